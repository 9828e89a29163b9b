use std::path::PathBuf;

use access_point::config::HOME_ENV;
use access_point::{Config, Gateway};
use chrono::{TimeDelta, Utc};
use station_ble::{BtleConnector, LinkError};
use station_store::{JsonStore, STORE_FILE, StationStore};
use tracing::info;

#[derive(clap::Parser)]
#[command(name = "access-point")]
#[command(about = "Sensor station access point")]
struct Cli {
    /// Directory holding configuration and station store
    #[arg(long, env = HOME_ENV)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Search for sensor stations that are not managed yet
    Scan,
    /// Collect data from all enabled stations once
    Collect,
    /// Lock and forget all disabled stations
    Lock,
    /// Run the access point until Ctrl-C
    Run {
        /// Search for new stations on the first pass
        #[arg(long)]
        scan: bool,
    },
    /// List managed stations
    Stations,
    /// Adopt a station
    Enable { address: String },
    /// Give up a station; it is locked on the next pass
    Disable { address: String },
    /// Set alarm limits of a sensor
    Limits {
        address: String,
        sensor: String,
        #[arg(long)]
        lower: Option<f64>,
        #[arg(long)]
        upper: Option<f64>,
        /// Seconds a value must stay outside the limits before it alarms
        #[arg(long)]
        tripping: Option<i64>,
    },
    /// Print stored measurements as JSON
    Measurements,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli: Cli = clap::Parser::parse();
    let home = access_point::access_point_home(cli.home)?;
    let first_start = !Config::exists(&home);
    let mut config = Config::load(&home)?;
    access_point::logging::init(config.debug)?;
    if first_start {
        info!(home = %home.display(), "wrote default configuration");
    }

    let mut store = JsonStore::open(home.join(STORE_FILE))?;

    match cli.command {
        Commands::Stations => {
            let disabled = store.disabled_addresses()?;
            for (address, state) in store.station_states()? {
                let dip_id = state.dip_id.map_or_else(|| "-".to_string(), |id| id.to_string());
                let status = if disabled.contains(&address) {
                    "disabled"
                } else if state.connection_alive {
                    "alive"
                } else {
                    "lost"
                };
                println!("{address}\t{dip_id}\t{status}");
            }
        }
        Commands::Enable { address } => store.enable(&address, Utc::now())?,
        Commands::Disable { address } => store.disable(&address)?,
        Commands::Limits { address, sensor, lower, upper, tripping } => {
            store.set_limits(&address, &sensor, lower, upper, tripping.map(TimeDelta::seconds))?;
        }
        Commands::Measurements => println!("{}", serde_json::to_string_pretty(&store.measurements()?)?),
        Commands::Scan => {
            for station in gateway(store, &config).await?.find_stations().await? {
                println!("{}\t{}", station.address, station.dip_id);
            }
        }
        Commands::Collect => gateway(store, &config).await?.collect_data().await,
        Commands::Lock => gateway(store, &config).await?.lock_stations().await,
        Commands::Run { scan } => {
            let mut gateway = gateway(store, &config).await?;
            config.scan_active = scan;
            access_point::run(&mut gateway, &mut config).await;
        }
    }
    Ok(())
}

async fn gateway(store: JsonStore, config: &Config) -> Result<Gateway<BtleConnector, JsonStore>, LinkError> {
    let radio = BtleConnector::new(config.timeouts()).await?;
    Ok(Gateway::new(radio, store, config))
}
