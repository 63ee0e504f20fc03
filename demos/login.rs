use std::{
    env,
    thread,
    time::{Duration, Instant},
};

use clanlord::{consts::DEFAULT_SERVER_PORT, Credentials, Session, SessionConfig, SessionState};

// CLANLORD_CHARACTER and CLANLORD_PASSWORD name the character to log in as.
// CLANLORD_SERVER may be `host` or `host:port`.
fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let character = env::var("CLANLORD_CHARACTER").expect("CLANLORD_CHARACTER is not set");
    let password = env::var("CLANLORD_PASSWORD").expect("CLANLORD_PASSWORD is not set");
    let mut cfg = SessionConfig::default()
        .character(character)
        .credentials(Credentials::password(password))
        .on_state_change(|from, to, _| {
            log::info!("session went from {:?} to {:?}", from, to);
        });
    if let Ok(server) = env::var("CLANLORD_SERVER") {
        let (host, port) = match server.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap()),
            None => (server, DEFAULT_SERVER_PORT),
        };
        cfg = cfg.server(host, port);
    }

    let mut session = Session::new(cfg).unwrap();
    session.connect().unwrap();
    session.queue_command("/who");

    let deadline = Instant::now() + Duration::from_secs(30);
    while session.state() == SessionState::Running && Instant::now() < deadline {
        session.update();
        for line in session.take_console() {
            println!("{line}");
        }
        for note in session.take_notifications() {
            println!("* {:?} {}: {}", note.kind, note.name, note.text);
        }
        thread::sleep(Duration::from_millis(100));
    }
    let snapshot = session.snapshot(Instant::now());
    println!(
        "{} frames, {} lost, latency {:?}",
        snapshot.num_frames,
        snapshot.lost_frames,
        session.latency()
    );
    session.disconnect();
    for line in session.take_console() {
        println!("{line}");
    }
}
