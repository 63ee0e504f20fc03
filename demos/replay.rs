use std::{env, fs::File, io::BufReader, sync::Arc, time::Instant};

use clanlord::{catalog::NullCatalog, time, MoviePlayer, Presentation};

fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: replay <movie file>");
    let file = File::open(&path).unwrap();
    let mut player = MoviePlayer::open(BufReader::new(file), Arc::new(NullCatalog)).unwrap();
    let header = *player.header();
    log::info!(
        "{path}: version {}, {} frames recorded",
        header.version,
        header.frame_count
    );
    if let Some(recorded) = time::mac_to_system_time(header.start_time) {
        log::info!("recorded at {:?}", recorded);
    }

    let now = Instant::now();
    let played = player.play_to_end(now).unwrap();
    let world = player.world();
    println!(
        "played {played} frames, {} lost, last ack {}",
        world.lost_frames(),
        world.ack_frame()
    );

    let snapshot = player.snapshot(now, &Presentation::default());
    for descriptor in snapshot.descriptors.values() {
        println!("{:>3} {:?} {}", descriptor.index, descriptor.kind, descriptor.name);
    }
    println!(
        "hp {}/{} sp {}/{} balance {}/{}",
        snapshot.stats.hp,
        snapshot.stats.hp_max,
        snapshot.stats.sp,
        snapshot.stats.sp_max,
        snapshot.stats.balance,
        snapshot.stats.balance_max
    );
    for line in player.world_mut().take_console() {
        println!("> {line}");
    }
}
