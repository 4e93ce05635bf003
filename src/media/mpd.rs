//! MPD adapter speaking the plain-text protocol over TCP.
//!
//! A command is one line; the reply is `key: value` lines terminated by `OK`
//! or an `ACK [...]` error line.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use super::types::{MediaSnapshot, MediaSource, SourceKind};
use crate::config::MpdConfig;
use crate::error::AdapterError;
use crate::format::{format_audio_info, format_bitrate, format_time};

const NAME: &str = "MPD";

type Reply = HashMap<String, String>;

struct MpdConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl MpdConnection {
    fn open(host: &str, port: u16, timeout: Duration) -> Result<Self, AdapterError> {
        let connect_err = |reason: String| AdapterError::Connect {
            source_name: NAME,
            reason,
        };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| connect_err(format!("{host}:{port} did not resolve")))?;
        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| connect_err(e.to_string()))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| connect_err(e.to_string()))?;
        let writer = stream.try_clone().map_err(|e| connect_err(e.to_string()))?;

        let mut conn = Self {
            reader: BufReader::new(stream),
            writer,
        };
        let greeting = conn.read_line()?;
        if !greeting.starts_with("OK MPD") {
            return Err(connect_err(format!("unexpected greeting {greeting:?}")));
        }
        log::debug!("MPD greeting: {greeting}");
        Ok(conn)
    }

    fn read_line(&mut self) -> Result<String, AdapterError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).map_err(io_err)?;
        if n == 0 {
            return Err(AdapterError::Protocol {
                source_name: NAME,
                reason: "connection closed by server".into(),
            });
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn command(&mut self, command: &str) -> Result<Reply, AdapterError> {
        self.writer
            .write_all(format!("{command}\n").as_bytes())
            .map_err(io_err)?;

        let mut reply = Reply::new();
        loop {
            let line = self.read_line()?;
            if line == "OK" {
                return Ok(reply);
            }
            if line.starts_with("ACK") {
                return Err(AdapterError::Protocol {
                    source_name: NAME,
                    reason: format!("`{command}` rejected: {line}"),
                });
            }
            if let Some((key, value)) = line.split_once(": ") {
                // First occurrence wins (multi-valued tags such as Artist).
                reply
                    .entry(key.to_ascii_lowercase())
                    .or_insert_with(|| value.to_string());
            }
        }
    }
}

fn io_err(error: std::io::Error) -> AdapterError {
    AdapterError::Io {
        source_name: NAME,
        error,
    }
}

/// Build a snapshot from `status` and `currentsong` replies.
pub fn snapshot_from_replies(status: &Reply, song: &Reply) -> MediaSnapshot {
    let text = |reply: &Reply, key: &str, default: &str| {
        reply.get(key).cloned().unwrap_or_else(|| default.to_string())
    };
    let flag = |key: &str| {
        status
            .get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };

    let mut snapshot = MediaSnapshot::new()
        .with("title", text(song, "title", "No Title"))
        .with("artist", text(song, "artist", "No Artist"))
        .with("album", text(song, "album", "No Album"))
        .with("track", text(song, "track", "No Track"))
        .with("audio", format_audio_info(&text(status, "audio", "Unknown")))
        .with("bitrate", format_bitrate(&text(status, "bitrate", "0")))
        .with("state", text(status, "state", "unknown"))
        .with("elapsed", format_time(&text(status, "elapsed", "0")))
        .with("duration", format_time(&text(status, "duration", "0")))
        .with("volume", flag("volume"))
        .with("repeat", flag("repeat"))
        .with("random", flag("random"))
        .with("single", flag("single"))
        .with("consume", flag("consume"));
    if let Some(playlist) = status.get("playlist") {
        snapshot.insert("playlist", playlist.as_str());
    }
    if let Some(length) = status.get("playlistlength") {
        snapshot.insert("playlistlength", length.as_str());
    }
    snapshot
}

pub struct MpdSource {
    config: MpdConfig,
    conn: Mutex<Option<MpdConnection>>,
}

impl MpdSource {
    pub fn new(config: MpdConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    fn run(&self, command: &str) -> Result<Reply, AdapterError> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(AdapterError::NotConnected { source_name: NAME })?;
        let result = conn.command(command);
        if let Err(AdapterError::Io { .. }) = &result {
            *guard = None;
        }
        result
    }

    fn control(&self, command: &str, description: &str) {
        match self.run(command) {
            Ok(_) => log::info!("MPD: {description}"),
            Err(e) => log::error!("MPD: {description} failed: {e}"),
        }
    }
}

impl MediaSource for MpdSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mpd
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn connect(&self) -> Result<(), AdapterError> {
        let timeout = Duration::from_millis(self.config.timeout_ms.max(1));
        let conn = MpdConnection::open(&self.config.host, self.config.port, timeout)?;
        *self.conn.lock() = Some(conn);
        log::info!("Connected to MPD at {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    fn fetch_snapshot(&self) -> Result<Option<MediaSnapshot>, AdapterError> {
        let status = self.run("status")?;
        let song = self.run("currentsong")?;
        Ok(Some(snapshot_from_replies(&status, &song)))
    }

    fn mark_disconnected(&self) {
        self.conn.lock().take();
    }

    fn next(&self) {
        self.control("next", "next song");
    }

    fn previous(&self) {
        self.control("previous", "previous song");
    }

    fn play(&self) {
        self.control("play", "play");
    }

    fn pause(&self) {
        self.control("pause 1", "pause");
    }

    fn toggle_play_pause(&self) {
        match self.run("status") {
            Ok(status) if status.get("state").map(String::as_str) == Some("play") => {
                self.pause()
            }
            // `pause 0` resumes a paused song; from stop it needs `play`.
            Ok(status) if status.get("state").map(String::as_str) == Some("pause") => {
                self.control("pause 0", "resume")
            }
            Ok(_) => self.play(),
            Err(e) => log::error!("MPD: toggle play/pause failed: {e}"),
        }
    }

    fn set_volume(&self, volume: u8) {
        let volume = volume.min(100);
        self.control(&format!("setvol {volume}"), &format!("volume {volume}"));
    }

    fn cleanup(&self) {
        let mut guard = self.conn.lock();
        if let Some(mut conn) = guard.take() {
            // The server closes without replying.
            if let Err(e) = conn.writer.write_all(b"close\n") {
                log::warn!("Error closing MPD connection: {e}");
            }
            log::info!("MPD client disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread::JoinHandle;

    /// One-connection fake MPD answering from a fixed script of
    /// `(expected command, reply lines)`; records what it received.
    fn fake_server(
        script: Vec<(&'static str, &'static str)>,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            writer.write_all(b"OK MPD 0.23.5\n").unwrap();
            let mut received = Vec::new();
            for (expected, reply) in script {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                assert_eq!(line, expected);
                received.push(line);
                writer.write_all(reply.as_bytes()).unwrap();
            }
            received
        });
        (port, handle)
    }

    fn source(port: u16) -> MpdSource {
        MpdSource::new(MpdConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port,
            timeout_ms: 2000,
        })
    }

    #[test]
    fn test_snapshot_defaults_for_empty_replies() {
        let snap = snapshot_from_replies(&Reply::new(), &Reply::new());
        assert_eq!(snap.get("title").unwrap().to_string(), "No Title");
        assert_eq!(snap.get("track").unwrap().to_string(), "No Track");
        assert_eq!(snap.get("bitrate").unwrap().to_string(), "0 kbps");
        assert_eq!(snap.get("elapsed").unwrap().to_string(), "00:00");
        assert_eq!(snap.get("repeat").unwrap().to_string(), "0");
        assert!(snap.get("playlist").is_none());
    }

    #[test]
    fn test_fetch_snapshot_over_tcp() {
        let (port, server) = fake_server(vec![
            (
                "status",
                "volume: 75\nrepeat: 1\nrandom: 0\nsingle: 0\nconsume: 0\n\
                 playlist: 4\nplaylistlength: 12\nstate: play\nelapsed: 65.3\n\
                 duration: 241.0\nbitrate: 320\naudio: 44100:16:2\nOK\n",
            ),
            (
                "currentsong",
                "file: a.flac\nArtist: Band\nArtist: Guest\nTitle: Song\nAlbum: LP\nTrack: 3\nOK\n",
            ),
        ]);
        let mpd = source(port);
        mpd.connect().unwrap();
        assert!(mpd.is_connected());

        let snap = mpd.fetch_snapshot().unwrap().unwrap();
        assert_eq!(snap.get("title").unwrap().to_string(), "Song");
        assert_eq!(snap.get("artist").unwrap().to_string(), "Band");
        assert_eq!(snap.get("audio").unwrap().to_string(), "44.1kHz/16bit");
        assert_eq!(snap.get("bitrate").unwrap().to_string(), "320 kbps");
        assert_eq!(snap.get("elapsed").unwrap().to_string(), "01:05");
        assert_eq!(snap.get("duration").unwrap().to_string(), "04:01");
        assert_eq!(snap.get("volume").unwrap().to_string(), "75");
        assert_eq!(snap.get("playlistlength").unwrap().to_string(), "12");
        assert_eq!(snap.state().as_deref(), Some("play"));
        server.join().unwrap();
    }

    #[test]
    fn test_toggle_pauses_when_playing() {
        let (port, server) = fake_server(vec![
            ("status", "state: play\nOK\n"),
            ("pause 1", "OK\n"),
            ("status", "state: pause\nOK\n"),
            ("pause 0", "OK\n"),
        ]);
        let mpd = source(port);
        mpd.connect().unwrap();
        mpd.toggle_play_pause();
        mpd.toggle_play_pause();
        mpd.cleanup();
        assert!(!mpd.is_connected());
        assert_eq!(server.join().unwrap().len(), 4);
    }

    #[test]
    fn test_ack_is_protocol_error_and_keeps_connection() {
        let (port, server) = fake_server(vec![(
            "status",
            "ACK [5@0] {status} unknown command\n",
        )]);
        let mpd = source(port);
        mpd.connect().unwrap();
        assert!(matches!(
            mpd.fetch_snapshot(),
            Err(AdapterError::Protocol { .. })
        ));
        assert!(mpd.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_closed_server_drops_connection() {
        let (port, server) = fake_server(Vec::new());
        let mpd = Arc::new(source(port));
        mpd.connect().unwrap();
        server.join().unwrap();
        assert!(mpd.fetch_snapshot().is_err());
        mpd.mark_disconnected();
        assert!(!mpd.is_connected());
    }

    #[test]
    fn test_controls_without_connection_only_log() {
        let mpd = source(1);
        mpd.next();
        mpd.set_volume(150);
        assert!(matches!(
            mpd.fetch_snapshot(),
            Err(AdapterError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_bad_greeting_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"HELLO\n").unwrap();
        });
        assert!(matches!(
            source(port).connect(),
            Err(AdapterError::Connect { .. })
        ));
        server.join().unwrap();
    }
}
