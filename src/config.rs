//! Stream backend configuration

use std::env;
use std::time::Duration;

use crate::source::SourceSpec;

/// Configuration for the streaming backend
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// MQTT broker host
    pub broker_host: String,

    /// MQTT broker port
    pub broker_port: u16,

    /// MQTT client id
    pub client_id: String,

    /// Broker username (empty = anonymous)
    pub username: String,

    /// Broker password
    pub password: String,

    /// Thing name; the signaling topic tree hangs off this
    pub thing_name: String,

    /// MQTT keep-alive interval
    pub keep_alive: Duration,

    /// How long the initial broker connection may take
    pub connect_timeout: Duration,

    /// Drain delay between the final disconnect message and teardown
    pub disconnect_drain: Duration,

    /// Output frame rate
    pub fps: u32,

    /// STUN servers handed to every peer connection
    pub stun_servers: Vec<String>,

    /// Camera table: 1-based index into the source list
    pub cameras: Vec<SourceSpec>,

    /// Camera loaded at startup
    pub default_camera: i32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "rmcs-stream".to_string(),
            username: String::new(),
            password: String::new(),
            thing_name: "robot".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            disconnect_drain: Duration::from_millis(500),
            fps: 30,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            cameras: SourceSpec::default_catalog(),
            default_camera: 1,
        }
    }
}

impl StreamConfig {
    /// Build a config from `RMCS_*` environment variables, falling back to
    /// the defaults for anything unset. Used by the C façade, where no
    /// caller-side configuration surface exists.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("RMCS_BROKER_HOST") {
            config.broker_host = host;
        }
        if let Some(port) = env::var("RMCS_BROKER_PORT").ok().and_then(|p| p.parse().ok()) {
            config.broker_port = port;
        }
        if let Ok(id) = env::var("RMCS_CLIENT_ID") {
            config.client_id = id;
        }
        if let Ok(user) = env::var("RMCS_USERNAME") {
            config.username = user;
        }
        if let Ok(pass) = env::var("RMCS_PASSWORD") {
            config.password = pass;
        }
        if let Ok(thing) = env::var("RMCS_THING_NAME") {
            config.thing_name = thing;
        }
        if let Some(cam) = env::var("RMCS_DEFAULT_CAMERA").ok().and_then(|c| c.parse().ok()) {
            config.default_camera = cam;
        }

        config
    }

    /// Set the broker address
    pub fn broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.broker_host = host.into();
        self.broker_port = port;
        self
    }

    /// Set broker credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the thing name
    pub fn thing_name(mut self, name: impl Into<String>) -> Self {
        self.thing_name = name.into();
        self
    }

    /// Set the MQTT client id
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Replace the camera table
    pub fn cameras(mut self, cameras: Vec<SourceSpec>) -> Self {
        self.cameras = cameras;
        self
    }

    /// Set the camera loaded at startup
    pub fn default_camera(mut self, index: i32) -> Self {
        self.default_camera = index;
        self
    }

    /// Set the output frame rate
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Look up the source for a 1-based camera index
    pub fn source_spec(&self, index: i32) -> Option<&SourceSpec> {
        if index < 1 {
            return None;
        }
        self.cameras.get((index - 1) as usize)
    }

    /// Tick period derived from the frame rate
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}
