use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use sox_bus::bus::BusConfig;

pub struct RadioConfig {
    host: String,
    port: u16,
    audio_dir: PathBuf,
    public_dir: PathBuf,
    current_song: PathBuf,
    sox_path: PathBuf,
    default_bitrate: u64,
    bitrate_divisor: u64,
    media_type: String,
    song_volume: String,
    fx_volume: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            audio_dir: PathBuf::from("audio"),
            public_dir: PathBuf::from("public"),
            current_song: PathBuf::from("songs/conversation.mp3"),
            sox_path: PathBuf::from("sox"),
            default_bitrate: 128_000,
            bitrate_divisor: 8,
            media_type: "mp3".to_string(),
            song_volume: "0.99".to_string(),
            fx_volume: "0.1".to_string(),
        }
    }
}

impl RadioConfig {
    /// Reads the process environment. Unset or unparseable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parsed(&lookup, "PORT") {
            config.port = port;
        }
        if let Some(dir) = lookup("AUDIO_DIR") {
            config.audio_dir = dir.into();
        }
        if let Some(dir) = lookup("PUBLIC_DIR") {
            config.public_dir = dir.into();
        }
        if let Some(song) = lookup("CURRENT_SONG") {
            config.current_song = song.into();
        }
        if let Some(sox) = lookup("SOX_PATH") {
            config.sox_path = sox.into();
        }
        if let Some(bits) = parsed(&lookup, "DEFAULT_BITRATE") {
            config.default_bitrate = bits;
        }
        if let Some(divisor) = parsed::<u64>(&lookup, "BITRATE_DIVISOR") {
            config.bitrate_divisor = divisor.max(1);
        }
        if let Some(media_type) = lookup("MEDIA_TYPE") {
            config.media_type = media_type;
        }
        if let Some(volume) = lookup("SONG_VOLUME") {
            config.song_volume = volume;
        }
        if let Some(volume) = lookup("FX_VOLUME") {
            config.fx_volume = volume;
        }
        config
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn fx_dir(&self) -> PathBuf {
        self.audio_dir.join("fx")
    }

    /// `CURRENT_SONG` is relative to the audio directory.
    pub fn track(&self) -> PathBuf {
        self.audio_dir.join(&self.current_song)
    }

    pub fn sox_path(&self) -> &Path {
        &self.sox_path
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            track: self.track(),
            fx_dir: self.fx_dir(),
            default_bitrate: self.default_bitrate,
            bitrate_divisor: self.bitrate_divisor,
            media_type: self.media_type.clone(),
            volume: self.song_volume.clone(),
            fx_volume: self.fx_volume.clone(),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring invalid {}={:?}", key, value);
            None
        }
    }
}

pub fn config() -> &'static RadioConfig {
    static CONFIG: LazyLock<RadioConfig> = LazyLock::new(RadioConfig::from_env);
    &CONFIG
}
