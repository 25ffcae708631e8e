use std::os::fd::AsFd;
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

/// Shared memory buffer attached to a layer surface
pub struct ShmBuffer {
    pool: wl_shm_pool::WlShmPool,
    buffer: wl_buffer::WlBuffer,
    mmap: memmap2::MmapMut,
    width: u32,
    height: u32,
}

impl ShmBuffer {
    pub fn new<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, ()> + 'static,
    {
        if width == 0 || height == 0 {
            anyhow::bail!("Buffer size must be non-zero, got {}x{}", width, height);
        }

        let stride = width * 4; // ARGB8888
        let size = stride * height;

        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());
        let buffer = pool.create_buffer(
            0,
            width as i32,
            height as i32,
            stride as i32,
            wl_shm::Format::Argb8888,
            qh,
            (),
        );

        Ok(Self {
            pool,
            buffer,
            mmap,
            width,
            height,
        })
    }

    /// Fully transparent buffer of the given size
    pub fn transparent<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, ()> + 'static,
    {
        let mut buffer = Self::new(shm, width, height, qh)?;
        buffer.fill(argb(0, 0, 0, 0));
        Ok(buffer)
    }

    pub fn fill(&mut self, pixel: [u8; 4]) {
        for chunk in self.mmap.chunks_exact_mut(4) {
            chunk.copy_from_slice(&pixel);
        }
    }

    pub fn buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}

/// One ARGB8888 pixel in memory order (little-endian BGRA)
pub fn argb(a: u8, r: u8, g: u8, b: u8) -> [u8; 4] {
    u32::from_be_bytes([a, r, g, b]).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argb_memory_order() {
        assert_eq!(argb(0xff, 0x11, 0x22, 0x33), [0x33, 0x22, 0x11, 0xff]);
        assert_eq!(argb(0, 0, 0, 0), [0, 0, 0, 0]);
    }
}
