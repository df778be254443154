use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{WireFormat, WorldConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Movement speed in world units per second
    #[arg(short, long, default_value = "200")]
    speed: f32,

    /// World width
    #[arg(long, default_value = "800")]
    width: f32,

    /// World height
    #[arg(long, default_value = "600")]
    height: f32,

    /// Edge length of an entity, used for clamping
    #[arg(long, default_value = "20")]
    entity_size: f32,

    /// How long a chat bubble stays up, in milliseconds
    #[arg(long, default_value = "5000")]
    chat_ttl_ms: u64,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Events buffered per client before it is disconnected as stalled
    #[arg(short, long, default_value = "256")]
    queue: usize,

    /// Outbound encoding: json or bincode
    #[arg(short, long, default_value = "json")]
    format: WireFormat,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let world = WorldConfig {
            width: self.width,
            height: self.height,
            entity_size: self.entity_size,
            speed: self.speed,
            tick_rate: self.tick_rate.max(1),
            chat_ttl: Duration::from_millis(self.chat_ttl_ms),
            ..WorldConfig::default()
        };

        ServerConfig {
            addr: format!("{}:{}", self.host, self.port),
            world,
            format: self.format,
            max_clients: self.max_clients,
            event_queue_capacity: self.queue,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut server = Server::bind(args.into_config()).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
