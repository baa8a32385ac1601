use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use contracts::{NamespaceId, RegisterActorRequest, SimError, WorldConfig};
use engine_api::{serve, NullMemoryService, SimEngine};

fn print_usage() {
    println!("monument <command>");
    println!("commands:");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  create <namespace> [width] [height] [epoch] [goal...]");
    println!("  register <namespace> <actor_id> [x y]");
    println!("  status <namespace>");
    println!("  advance <namespace>");
    println!("  epoch <namespace> <tick>");
    println!();
    println!("data directory: $MONUMENT_DATA_DIR (default data/sims)");
}

fn data_dir() -> PathBuf {
    env::var("MONUMENT_DATA_DIR")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/sims"))
}

fn parse_namespace(value: Option<&String>) -> Result<NamespaceId, String> {
    let raw = value.ok_or_else(|| "missing namespace".to_string())?;
    NamespaceId::parse(raw).map_err(|err| err.to_string())
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>()
        .map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn open_engine(namespace: &NamespaceId) -> Result<SimEngine, SimError> {
    SimEngine::open(&data_dir(), namespace)
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving monument api on http://{addr}");
                if let Err(err) = serve(addr, data_dir(), Arc::new(NullMemoryService)).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        },
        Some("create") => {
            let namespace = parse_namespace(args.get(2)).unwrap_or_else(|err| fail(err));
            let mut config = WorldConfig::default();
            if let Some(raw) = args.get(3) {
                config.width = raw
                    .parse::<u32>()
                    .unwrap_or_else(|_| fail(format!("invalid width: {raw}")));
            }
            if let Some(raw) = args.get(4) {
                config.height = raw
                    .parse::<u32>()
                    .unwrap_or_else(|_| fail(format!("invalid height: {raw}")));
            }
            if let Some(raw) = args.get(5) {
                config.epoch = raw
                    .parse::<u64>()
                    .unwrap_or_else(|_| fail(format!("invalid epoch: {raw}")));
            }
            if args.len() > 6 {
                config.goal = args[6..].join(" ");
            }

            match SimEngine::create(&data_dir(), &namespace, config) {
                Ok(engine) => match engine.status() {
                    Ok(status) => println!(
                        "created {} ({}x{}, epoch {})",
                        namespace,
                        engine.world().width(),
                        engine.world().height(),
                        status.epoch
                    ),
                    Err(err) => fail(err),
                },
                Err(err) => fail(err),
            }
        }
        Some("register") => {
            let namespace = parse_namespace(args.get(2)).unwrap_or_else(|err| fail(err));
            let actor_id = args
                .get(3)
                .cloned()
                .unwrap_or_else(|| fail("missing actor_id"));
            let x = args.get(4).and_then(|raw| raw.parse::<u32>().ok());
            let y = args.get(5).and_then(|raw| raw.parse::<u32>().ok());

            let mut engine = open_engine(&namespace).unwrap_or_else(|err| fail(err));
            let request = RegisterActorRequest {
                actor_id,
                x,
                y,
                facing: None,
                scopes: None,
                secret: None,
                custom_instructions: String::new(),
            };
            match engine.register_actor(request) {
                Ok((response, _)) => {
                    println!("registered {} secret={}", response.actor_id, response.secret)
                }
                Err(err) => fail(err),
            }
        }
        Some("status") => {
            let namespace = parse_namespace(args.get(2)).unwrap_or_else(|err| fail(err));
            let engine = open_engine(&namespace).unwrap_or_else(|err| fail(err));
            match engine.status() {
                Ok(status) => println!(
                    "namespace={} tick={} phase={} actors={} submitted={} epoch={}",
                    status.namespace,
                    status.supertick_id,
                    status.phase,
                    status.actor_count,
                    status.submitted_count,
                    status.epoch
                ),
                Err(err) => fail(err),
            }
        }
        Some("advance") => {
            let namespace = parse_namespace(args.get(2)).unwrap_or_else(|err| fail(err));
            let mut engine = open_engine(&namespace).unwrap_or_else(|err| fail(err));
            match engine.force_advance() {
                Ok(_) => println!(
                    "advanced to tick {} ({})",
                    engine.world().supertick_id,
                    engine.world().phase
                ),
                Err(err) => fail(err),
            }
        }
        Some("epoch") => {
            let namespace = parse_namespace(args.get(2)).unwrap_or_else(|err| fail(err));
            let epoch = parse_u64(args.get(3), "tick").unwrap_or_else(|err| fail(err));
            let mut engine = open_engine(&namespace).unwrap_or_else(|err| fail(err));
            match engine.set_epoch(epoch) {
                Ok(_) => println!(
                    "epoch set to {epoch} (phase {})",
                    engine.world().phase
                ),
                Err(err) => fail(err),
            }
        }
        _ => {
            print_usage();
        }
    }
}
