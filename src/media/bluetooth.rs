//! Bluetooth (AVRCP) adapter backed by BlueZ on the system bus.

use std::collections::HashMap;

use parking_lot::Mutex;
use zbus::blocking::Connection;
use zvariant::{DeserializeDict, OwnedObjectPath, OwnedValue, Type};

use super::types::{MediaSnapshot, MediaSource, SourceKind};
use crate::error::AdapterError;
use crate::format::format_duration_secs;

const NAME: &str = "Bluetooth";
const BLUEZ: &str = "org.bluez";
const PLAYER_IFACE: &str = "org.bluez.MediaPlayer1";

type ManagedObjects = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>;

/// The subset of `org.bluez.MediaPlayer1` properties we display.
#[derive(Debug, Default, Clone, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct PlayerProperties {
    #[zvariant(rename = "Status")]
    pub status: Option<String>,
    /// Milliseconds.
    #[zvariant(rename = "Position")]
    pub position: Option<u32>,
    #[zvariant(rename = "Track")]
    pub track: Option<TrackProperties>,
    #[zvariant(rename = "Volume")]
    pub volume: Option<u16>,
}

#[derive(Debug, Default, Clone, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct TrackProperties {
    #[zvariant(rename = "Title")]
    pub title: Option<String>,
    #[zvariant(rename = "Artist")]
    pub artist: Option<String>,
    #[zvariant(rename = "Album")]
    pub album: Option<String>,
    #[zvariant(rename = "TrackNumber")]
    pub track_number: Option<u32>,
    /// Milliseconds.
    #[zvariant(rename = "Duration")]
    pub duration: Option<u32>,
}

/// BlueZ `Status` → MPD-style state word.
pub fn map_status(status: &str) -> String {
    let status = status.to_lowercase();
    match status.as_str() {
        "playing" | "forward-seek" | "reverse-seek" => "play".into(),
        "paused" => "pause".into(),
        "stopped" | "error" => "stop".into(),
        _ => status,
    }
}

pub fn snapshot_from_properties(props: &PlayerProperties) -> MediaSnapshot {
    let track = props.track.clone().unwrap_or_default();
    let ms_to_time = |ms: Option<u32>| format_duration_secs(u64::from(ms.unwrap_or(0)) / 1000);

    MediaSnapshot::new()
        .with("title", track.title.unwrap_or_else(|| "No Title".into()))
        .with("artist", track.artist.unwrap_or_else(|| "No Artist".into()))
        .with("album", track.album.unwrap_or_else(|| "No Album".into()))
        .with(
            "track",
            track
                .track_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| "No Track".into()),
        )
        .with("bitrate", "Unknown")
        .with("audio", "Unknown")
        .with(
            "state",
            map_status(props.status.as_deref().unwrap_or("unknown")),
        )
        .with("elapsed", ms_to_time(props.position))
        .with("duration", ms_to_time(track.duration))
        .with("volume", i64::from(props.volume.unwrap_or(0)))
}

/// First object exposing the player interface, in path order so the choice
/// is stable across polls.
pub fn first_player<V>(
    objects: &HashMap<OwnedObjectPath, HashMap<String, V>>,
) -> Option<OwnedObjectPath> {
    let mut players: Vec<&OwnedObjectPath> = objects
        .iter()
        .filter(|(_, ifaces)| ifaces.contains_key(PLAYER_IFACE))
        .map(|(path, _)| path)
        .collect();
    players.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    players.first().map(|p| (*p).clone())
}

#[derive(Default)]
struct BluezState {
    bus: Option<Connection>,
    player: Option<OwnedObjectPath>,
    last_state: Option<String>,
}

pub struct BluetoothSource {
    state: Mutex<BluezState>,
}

impl BluetoothSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BluezState::default()),
        }
    }

    fn discover(bus: &Connection) -> Result<Option<OwnedObjectPath>, AdapterError> {
        let reply = bus.call_method(
            Some(BLUEZ),
            "/",
            Some("org.freedesktop.DBus.ObjectManager"),
            "GetManagedObjects",
            &(),
        )?;
        let objects: ManagedObjects = reply.body().deserialize()?;
        Ok(first_player(&objects))
    }

    /// Bus and player path, cloned out so the call runs without the lock.
    fn target(&self) -> Option<(Connection, OwnedObjectPath)> {
        let state = self.state.lock();
        Some((state.bus.clone()?, state.player.clone()?))
    }

    fn player_call(&self, method: &str) {
        let Some((bus, path)) = self.target() else {
            log::warn!("Bluetooth: no media player for {method}");
            return;
        };
        match bus.call_method(Some(BLUEZ), path.as_str(), Some(PLAYER_IFACE), method, &()) {
            Ok(_) => log::info!("Bluetooth: {method}"),
            Err(e) => log::error!("Bluetooth: {method} failed: {e}"),
        }
    }
}

impl Default for BluetoothSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for BluetoothSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Bluetooth
    }

    fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.bus.is_some() && state.player.is_some()
    }

    fn connect(&self) -> Result<(), AdapterError> {
        let existing = self.state.lock().bus.clone();
        let bus = match existing {
            Some(bus) => bus,
            None => Connection::system()?,
        };
        let player = Self::discover(&bus)?;

        let mut state = self.state.lock();
        state.bus = Some(bus);
        match player {
            Some(path) => {
                log::info!("Found Bluetooth media player at: {}", path.as_str());
                state.player = Some(path);
                Ok(())
            }
            None => Err(AdapterError::Connect {
                source_name: NAME,
                reason: "no media player found".into(),
            }),
        }
    }

    fn fetch_snapshot(&self) -> Result<Option<MediaSnapshot>, AdapterError> {
        let (bus, path) = self
            .target()
            .ok_or(AdapterError::NotConnected { source_name: NAME })?;
        let props: Result<PlayerProperties, zbus::Error> = bus
            .call_method(
                Some(BLUEZ),
                path.as_str(),
                Some("org.freedesktop.DBus.Properties"),
                "GetAll",
                &(PLAYER_IFACE,),
            )
            .and_then(|reply| reply.body().deserialize());

        match props {
            Ok(props) => {
                let snapshot = snapshot_from_properties(&props);
                self.state.lock().last_state = snapshot.state();
                Ok(Some(snapshot))
            }
            Err(e) => {
                // The phone may have gone away or re-registered its player.
                self.state.lock().player = None;
                Err(e.into())
            }
        }
    }

    fn mark_disconnected(&self) {
        let mut state = self.state.lock();
        state.player = None;
        state.last_state = None;
    }

    fn next(&self) {
        self.player_call("Next");
    }

    fn previous(&self) {
        self.player_call("Previous");
    }

    fn play(&self) {
        self.player_call("Play");
    }

    fn pause(&self) {
        self.player_call("Pause");
    }

    fn toggle_play_pause(&self) {
        let playing = self.state.lock().last_state.as_deref() == Some("play");
        if playing {
            self.pause();
        } else {
            self.play();
        }
    }

    fn set_volume(&self, volume: u8) {
        // AVRCP volume lives on the transport, not the player.
        log::debug!("Bluetooth: volume control not supported (requested {volume})");
    }

    fn cleanup(&self) {
        *self.state.lock() = BluezState::default();
        log::info!("Bluetooth client cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("playing"), "play");
        assert_eq!(map_status("forward-seek"), "play");
        assert_eq!(map_status("Reverse-Seek"), "play");
        assert_eq!(map_status("paused"), "pause");
        assert_eq!(map_status("stopped"), "stop");
        assert_eq!(map_status("error"), "stop");
        assert_eq!(map_status("buffering"), "buffering");
    }

    #[test]
    fn test_snapshot_from_properties() {
        let props = PlayerProperties {
            status: Some("playing".into()),
            position: Some(83_500),
            track: Some(TrackProperties {
                title: Some("Song".into()),
                artist: Some("Band".into()),
                album: None,
                track_number: Some(7),
                duration: Some(3_725_000),
            }),
            volume: Some(64),
        };
        let snap = snapshot_from_properties(&props);
        assert_eq!(snap.get("title").unwrap().to_string(), "Song");
        assert_eq!(snap.get("album").unwrap().to_string(), "No Album");
        assert_eq!(snap.get("track").unwrap().to_string(), "7");
        assert_eq!(snap.get("elapsed").unwrap().to_string(), "01:23");
        assert_eq!(snap.get("duration").unwrap().to_string(), "01:02:05");
        assert_eq!(snap.get("bitrate").unwrap().to_string(), "Unknown");
        assert_eq!(snap.get("volume").unwrap().to_string(), "64");
        assert_eq!(snap.state().as_deref(), Some("play"));
    }

    #[test]
    fn test_empty_properties_use_defaults() {
        let snap = snapshot_from_properties(&PlayerProperties::default());
        assert_eq!(snap.get("title").unwrap().to_string(), "No Title");
        assert_eq!(snap.get("track").unwrap().to_string(), "No Track");
        assert_eq!(snap.get("elapsed").unwrap().to_string(), "00:00");
        assert_eq!(snap.state().as_deref(), Some("unknown"));
    }

    #[test]
    fn test_first_player_is_stable() {
        let path = |p: &str| OwnedObjectPath::try_from(p).unwrap();
        let mut objects: HashMap<OwnedObjectPath, HashMap<String, ()>> = HashMap::new();
        objects.insert(
            path("/org/bluez/hci0"),
            HashMap::from([("org.bluez.Adapter1".to_string(), ())]),
        );
        objects.insert(
            path("/org/bluez/hci0/dev_BB/player0"),
            HashMap::from([(PLAYER_IFACE.to_string(), ())]),
        );
        objects.insert(
            path("/org/bluez/hci0/dev_AA/player0"),
            HashMap::from([(PLAYER_IFACE.to_string(), ())]),
        );
        assert_eq!(
            first_player(&objects).unwrap().as_str(),
            "/org/bluez/hci0/dev_AA/player0"
        );

        objects.retain(|p, _| p.as_str() == "/org/bluez/hci0");
        assert!(first_player(&objects).is_none());
    }

    #[test]
    fn test_unconnected_source() {
        let bt = BluetoothSource::new();
        assert!(!bt.is_connected());
        assert!(matches!(
            bt.fetch_snapshot(),
            Err(AdapterError::NotConnected { .. })
        ));
        // Controls without a player only log
        bt.next();
        bt.toggle_play_pause();
    }
}
