/**
 * Minimal harness for the Flare Rust SDK.
 *
 * Point it at a collector and run:
 *
 *   FLARE_ENDPOINT=https://collector.example.com/api/errors \
 *   FLARE_TOKEN=your-project-token \
 *   RUST_LOG=flare_core=debug cargo run -p flare_demo
 *
 *   cargo run -p flare_demo -- --panic      # test panic capture
 *   cargo run -p flare_demo -- --offline    # queue while offline, then replay
 */
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let test_panic = args.iter().any(|a| a == "--panic");
    let test_offline = args.iter().any(|a| a == "--offline");

    let options = flare::CoreOptions {
        endpoint: std::env::var("FLARE_ENDPOINT")
            .unwrap_or_else(|_| "https://collector.example.com/api/errors".into()),
        project_token: std::env::var("FLARE_TOKEN")
            .unwrap_or_else(|_| "PASTE_YOUR_TOKEN_HERE".into()),
        environment: "demo".into(),
        storage_dir: Some(std::env::temp_dir().join("flare-demo")),
        ..Default::default()
    };

    let _guard = match flare::init(options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("[demo] Failed to initialize Flare: {e}");
            std::process::exit(1);
        }
    };

    flare::set_user(Some(flare::User {
        id: Some("demo-user".into()),
        ..Default::default()
    }));
    flare::add_breadcrumb(
        "demo started",
        "lifecycle",
        flare::BreadcrumbLevel::Info,
        Some(json!({ "args": args.len() })),
    );

    if test_offline {
        println!("[demo] Going offline, reports will be queued");
        flare::set_online(false);
    }

    /*
     * A plain message, then a real error (file not found).
     */
    flare::capture_message("Hello from the Flare Rust SDK!");
    println!("[demo] Sent a text message");

    if let Err(e) = std::fs::read_to_string("/nonexistent/path.txt") {
        flare::capture_error(&e);
        println!("[demo] Sent an io::Error: {e}");
    }

    if test_offline {
        println!("[demo] Back online, replaying queue");
        flare::set_online(true);
    }

    flare::flush();
    if let Some(health) = flare::health() {
        println!("[demo] Pipeline health: {:?} {:?}", health.status, health.issues);
    }

    /*
     * The panic hook (catch_panics = true by default) reports this before
     * the default hook prints it.
     */
    if test_panic {
        println!("[demo] Triggering a panic...");
        panic!("Test panic from Flare demo");
    }

    println!("[demo] Done. Reports are flushed when _guard drops.");
}
