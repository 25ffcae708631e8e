//! Engine option strings (`-o` and `[engine] options`)

/// Playback options understood by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Repeat the current item forever
    pub loop_file: bool,
    /// Start over when the playlist ends
    pub loop_playlist: bool,
    pub mute: bool,
    /// Linear volume, 0.0 to 1.0
    pub volume: f64,
    pub shuffle: bool,
    pub speed: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            loop_file: false,
            loop_playlist: true,
            mute: false,
            volume: 1.0,
            shuffle: false,
            speed: 1.0,
        }
    }
}

impl EngineOptions {
    /// Parse option strings in order; later strings override earlier ones.
    ///
    /// Each string is a comma or whitespace separated list of `key[=value]`.
    /// Leading dashes are accepted so mpv-style `--mute` works too.
    /// Unknown keys and bad values are logged and skipped.
    pub fn parse<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        let mut options = Self::default();

        for source in sources {
            for token in source
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(|token| token.trim_start_matches('-'))
                .filter(|token| !token.is_empty())
            {
                let (key, value) = match token.split_once('=') {
                    Some((key, value)) => (key, Some(value)),
                    None => (token, None),
                };

                if let Err(e) = options.apply(key, value) {
                    log::warn!("Ignoring engine option '{}': {}", token, e);
                }
            }
        }

        options
    }

    fn apply(&mut self, key: &str, value: Option<&str>) -> Result<(), String> {
        match key {
            "loop" | "loop-file" => self.loop_file = parse_flag(value)?,
            "loop-playlist" => self.loop_playlist = parse_flag(value)?,
            "no-loop" => {
                self.loop_file = false;
                self.loop_playlist = false;
            }
            "mute" | "no-audio" => self.mute = parse_flag(value)?,
            "shuffle" => self.shuffle = parse_flag(value)?,
            "volume" => {
                let volume: f64 = parse_number(value)?;
                if !(0.0..=100.0).contains(&volume) {
                    return Err(format!("volume {} out of range 0-100", volume));
                }
                self.volume = volume / 100.0;
            }
            "speed" => {
                let speed: f64 = parse_number(value)?;
                if !speed.is_finite() || speed <= 0.0 {
                    return Err(format!("speed {} must be positive", speed));
                }
                self.speed = speed;
            }
            _ => return Err("unknown option".to_string()),
        }
        Ok(())
    }
}

fn parse_flag(value: Option<&str>) -> Result<bool, String> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("yes" | "true" | "inf" | "1") => Ok(true),
        Some("no" | "false" | "0") => Ok(false),
        Some(other) => Err(format!("expected yes or no, got '{}'", other)),
    }
}

fn parse_number(value: Option<&str>) -> Result<f64, String> {
    let value = value.ok_or("missing value")?;
    value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))
}
