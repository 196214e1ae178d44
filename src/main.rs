use anyhow::{anyhow, Context, Result};
use clap::Parser;
use garage_geo::{
    sdk::config::ResolverConfig,
    sdk::util::log::init_logging,
    BatchItem, Coordinate, EntityId, Resolver,
};
use std::{fs::File, io::Write, time::Duration};

/// Resolve distances from an origin to a set of addresses and garages
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Origin as "LAT,LNG" (e.g., "21.0285,105.8048")
    #[arg(short, long, value_parser = parse_origin)]
    origin: Coordinate,

    /// A destination address. Repeatable.
    #[arg(short, long)]
    address: Vec<String>,

    /// A known garage as "ID=ADDRESS". Repeatable.
    #[arg(short, long, value_parser = parse_garage)]
    garage: Vec<BatchItem>,

    /// [Optional] Give up on unfinished lookups after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// [Optional] Write the JSON result here instead of stdout
    #[arg(long)]
    output: Option<String>,
}

fn parse_origin(raw: &str) -> Result<Coordinate, String> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LNG, got {:?}", raw))?;
    let lat = lat.trim().parse().map_err(|_| format!("bad latitude {:?}", lat))?;
    let lng = lng.trim().parse().map_err(|_| format!("bad longitude {:?}", lng))?;
    Ok(Coordinate::new(lat, lng))
}

fn parse_garage(raw: &str) -> Result<BatchItem, String> {
    let (id, address) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=ADDRESS, got {:?}", raw))?;
    let id = id.trim().parse().map_err(|_| format!("bad garage id {:?}", id))?;
    Ok(BatchItem::for_entity(address, EntityId(id)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = ResolverConfig::from_env().context("Failed to load resolver configuration")?;
    let resolver = Resolver::from_config(&config)
        .await
        .context("Failed to build resolver")?;

    let items: Vec<BatchItem> = cli
        .address
        .iter()
        .map(BatchItem::new)
        .chain(cli.garage.iter().cloned())
        .collect();
    if items.is_empty() {
        return Err(anyhow!("Nothing to resolve: pass --address or --garage"));
    }

    let records = match cli.deadline_ms {
        Some(ms) => {
            resolver
                .resolve_batch_with_deadline(cli.origin, &items, Duration::from_millis(ms))
                .await?
        }
        None => resolver.resolve_batch(cli.origin, &items).await?,
    };

    for record in &records {
        log::info!(
            "{:<40} {:>10} {:>4} min  {:?}",
            record.address,
            record.display_distance(),
            record.travel_time_minutes,
            record.status
        );
    }

    let json_output = serde_json::to_string_pretty(&records)?;
    match &cli.output {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
            file.write_all(json_output.as_bytes())?;
            log::info!("Results written to {}", path);
        }
        None => println!("{}", json_output),
    }

    if let Err(e) = resolver.flush().await {
        log::warn!("Background cache writes did not finish: {}", e);
    }
    log::info!("Resolver stats: {:?}", resolver.stats());

    Ok(())
}
