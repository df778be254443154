use clap::Parser;
use client::network::{Client, ClientOptions};
use log::info;
use shared::{WireFormat, WorldConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server websocket address
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000")]
    server: String,

    /// Display name; the server picks one when omitted
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Outbound encoding: json or bincode
    #[arg(short = 'f', long, default_value = "json")]
    format: WireFormat,

    /// Wander around and chat on its own instead of reading stdin
    #[arg(short = 'b', long)]
    bot: bool,

    /// Movement speed used for prediction, in units per second
    #[arg(long, default_value = "200")]
    speed: f32,

    /// World width used for prediction clamping
    #[arg(long, default_value = "800")]
    width: f32,

    /// World height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: f32,
}

impl Args {
    fn into_options(self) -> ClientOptions {
        let world = WorldConfig {
            speed: self.speed,
            width: self.width,
            height: self.height,
            ..WorldConfig::default()
        };
        ClientOptions {
            server: self.server,
            name: self.name,
            format: self.format,
            bot: self.bot,
            world,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let options = args.into_options();

    info!("Starting client...");
    if options.bot {
        info!("Bot mode: wandering on its own");
    }

    let mut client = Client::connect(options).await?;
    client.run().await?;

    info!("Goodbye");
    Ok(())
}
