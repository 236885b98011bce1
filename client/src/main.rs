use clap::Parser;
use client::mirror::{Mirror, MoveIntent};
use client::session::Session;
use log::info;
use rand::Rng;
use shared::store::MemoryStore;
use shared::{clamp_to_field, Participant, FIELD_SIZE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Hub URL to connect to (the participant id is appended)
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Participant id; generated when omitted
    #[arg(short, long)]
    id: Option<String>,

    /// Display name
    #[arg(short, long, default_value = "anonymous")]
    name: String,

    /// Display color
    #[arg(short, long, default_value = "blue")]
    color: String,
}

/// Headless driver: a random-walk bot that exercises the whole pipeline.
/// An actual render surface would sample real input here instead.
fn bot_driver() -> impl FnMut(&Mirror) -> Option<MoveIntent> {
    let mut rng = rand::thread_rng();
    let mut intent = MoveIntent {
        right: true,
        ..Default::default()
    };

    move |_mirror| {
        // Change heading roughly twice a second
        if rng.gen_ratio(1, 30) {
            intent = MoveIntent {
                up: rng.gen_bool(0.5),
                down: rng.gen_bool(0.5),
                left: rng.gen_bool(0.5),
                right: rng.gen_bool(0.5),
            };
        }
        Some(intent)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let id = args
        .id
        .unwrap_or_else(|| format!("participant-{:04x}", rng.gen::<u16>()));
    let participant = Participant::new(
        id.clone(),
        args.name,
        clamp_to_field(rng.gen_range(0.0..FIELD_SIZE)),
        clamp_to_field(rng.gen_range(0.0..FIELD_SIZE)),
        args.color,
    );

    info!("Starting session for {} against {}", id, args.server);

    let store = MemoryStore::new();
    let mut session = Session::start(&args.server, participant, store).await;

    tokio::select! {
        _ = session.run(bot_driver()) => {
            if session.is_permanently_disconnected() {
                eprintln!(
                    "Disconnected: {}",
                    session.last_error().unwrap_or("connection lost")
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    session.shutdown();
    Ok(())
}
