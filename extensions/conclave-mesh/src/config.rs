use std::time::Duration;

use conclave::{
    media::{AudioConstraints, DisplayConstraints, VideoConstraints},
    session::MasterControls,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Delays the coordinator waits before acting on room traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// After a `user-joined` announcement, before dialing the newcomer
    pub join_dial_delay: Duration,
    /// After the roster arrives, before dialing each listed participant
    pub roster_dial_delay: Duration,
    /// After a transport error, before checking whether the identity must be recreated
    pub transport_recreate_delay: Duration,
    /// How long the host-control indicator stays up after a forced change
    pub host_indicator_duration: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            join_dial_delay: Duration::from_millis(1000),
            roster_dial_delay: Duration::from_millis(2000),
            transport_recreate_delay: Duration::from_millis(3000),
            host_indicator_duration: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    timing: Timing,
    video: VideoConstraints,
    audio: AudioConstraints,
    display: DisplayConstraints,
    ice_servers: Vec<IceServer>,
    master_controls: MasterControls,
    announce_membership: bool,
}

impl Config {
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn video(&self) -> &VideoConstraints {
        &self.video
    }

    pub fn audio(&self) -> &AudioConstraints {
        &self.audio
    }

    pub fn display(&self) -> &DisplayConstraints {
        &self.display
    }

    /// Handed to the peer transport implementation.
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Policy assumed until the host publishes one.
    pub fn master_controls(&self) -> MasterControls {
        self.master_controls
    }

    /// Whether to post join and leave lines into the room chat.
    pub fn announce_membership(&self) -> bool {
        self.announce_membership
    }
}

impl Config {
    pub fn timing_mut(&mut self) -> &mut Timing {
        &mut self.timing
    }

    pub fn video_mut(&mut self) -> &mut VideoConstraints {
        &mut self.video
    }

    pub fn audio_mut(&mut self) -> &mut AudioConstraints {
        &mut self.audio
    }

    pub fn display_mut(&mut self) -> &mut DisplayConstraints {
        &mut self.display
    }

    pub fn ice_servers_mut(&mut self) -> &mut Vec<IceServer> {
        &mut self.ice_servers
    }

    pub fn master_controls_mut(&mut self) -> &mut MasterControls {
        &mut self.master_controls
    }

    pub fn announce_membership_mut(&mut self) -> &mut bool {
        &mut self.announce_membership
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timing: Timing::default(),
            video: VideoConstraints::default(),
            audio: AudioConstraints::default(),
            display: DisplayConstraints::default(),
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
                IceServer::stun("stun:stun2.l.google.com:19302"),
                IceServer::stun("stun:stun3.l.google.com:19302"),
            ],
            master_controls: MasterControls::default(),
            announce_membership: false,
        }
    }
}

impl Config {
    /// Default configuration for local development
    pub fn development() -> Config {
        Config::default()
    }

    /// Test configuration. Every delay is zero so scheduled work is delivered immediately.
    pub fn testing() -> Config {
        Config {
            timing: Timing {
                join_dial_delay: Duration::ZERO,
                roster_dial_delay: Duration::ZERO,
                transport_recreate_delay: Duration::ZERO,
                host_indicator_duration: Duration::ZERO,
            },
            ice_servers: vec![],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::development();
        assert_eq!(config.timing().roster_dial_delay, Duration::from_secs(2));
        assert_eq!(config.ice_servers().len(), 4);
        assert!(config.master_controls().control_all_audio);
        assert!(!config.announce_membership());
        assert_eq!(config.video().ideal_width, 1280);
        assert!(config.display().audio);
    }

    #[test]
    fn testing_has_no_delays() {
        let mut config = Config::testing();
        assert_eq!(config.timing().join_dial_delay, Duration::ZERO);
        *config.announce_membership_mut() = true;
        assert!(config.announce_membership());
    }
}
