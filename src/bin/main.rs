use clap::{Parser, Subcommand};
use std::path::PathBuf;
use title_bridge::native::ffi::FfiActivator;
use title_bridge::resolver::{self, PointerWidth};
use title_bridge::{BridgeSettings, HostEvent, TitleBridge};

/// Bridge a native title-session component into host events
#[derive(Parser)]
#[command(name = "title-bridge")]
#[command(version)]
#[command(about = "Bridge a native title-session component into host events")]
struct Cli {
    /// Settings file (default: <config dir>/title-bridge/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolution descriptor path derived from an install directory
    Resolve {
        /// Directory the bridge binary is installed in (e.g. <root>/build/Release)
        module_dir: PathBuf,

        /// Print the 32-bit descriptor instead of the one for this target
        #[arg(long)]
        x86: bool,
    },
    /// Open a session and print every event as a JSON array until Ctrl-C
    Watch {
        /// Directory the bridge binary is installed in (e.g. <root>/build/Release)
        module_dir: PathBuf,

        /// Library to load through system resolution (overrides settings)
        #[arg(long)]
        system_library: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let settings = BridgeSettings::discover(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    match cli.command {
        Commands::Resolve { module_dir, x86 } => {
            let width = if x86 {
                PointerWidth::Bits32
            } else {
                PointerWidth::current()
            };
            match resolver::descriptor_path(&module_dir, &settings, width) {
                Ok(path) => println!("{}", path.display()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Watch {
            module_dir,
            system_library,
        } => {
            let activator =
                FfiActivator::new(system_library.unwrap_or_else(|| settings.system_library.clone()));
            // open() may run native callbacks and join the pump thread; keep it
            // off the runtime's worker threads.
            let opened = tokio::task::spawn_blocking(move || {
                TitleBridge::open(&activator, &module_dir, &settings)
            })
            .await;
            let mut bridge = match opened {
                Ok(Ok(bridge)) => bridge,
                Ok(Err(e)) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
                Err(_) => {
                    eprintln!("Error: bridge construction panicked");
                    std::process::exit(1);
                }
            };
            eprintln!("Watching {} ({})", bridge.component(), bridge.token());

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = bridge.next_event() => match event {
                        Some(event) => print_event(&event),
                        None => break,
                    },
                }
            }

            // close() joins the pump thread.
            let closed = tokio::task::spawn_blocking(move || bridge.close()).await;
            if closed.is_err() {
                eprintln!("Error: bridge teardown panicked");
                std::process::exit(1);
            }
        }
    }
}

fn print_event(event: &HostEvent) {
    match serde_json::to_string(&event.emit_args()) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("Error: could not encode '{}' event: {}", event.name(), e),
    }
}
