use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde_json::json;
use shardns_collective::{Communicator, LocalGroup, SelfComm, LEADER_RANK};
use shardns_io::{Dataspace, Datatype, ElementLayout, HyperslabDim, Selection};
use shardns_store::{InMemoryPool, OpenMode, StoreStats};
use shardns_types::{hash128, ContainerUuid, NodeKind, ObjectId, INDEX_MASK};
use shardns_vol::{ConnectorConfig, Container, HasAttributes, PropertyList, VolResult};
use tracing::info;

use crate::cli::*;

/// Columns of the demo dataset; one row per rank.
const DEMO_COLUMNS: u64 = 3;
/// How long a demo rank waits on a broadcast before giving up.
const DEMO_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Hash(args) => cmd_hash(args, &format),
        Command::Oid(OidCommand::Encode(args)) => cmd_oid_encode(args, &format),
        Command::Oid(OidCommand::Decode(args)) => cmd_oid_decode(args, &format),
        Command::Demo(args) => cmd_demo(args, &format),
        Command::Config(args) => cmd_config(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConnectorConfig> {
    match path {
        Some(path) => ConnectorConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ConnectorConfig::default()),
    }
}

fn cmd_hash(args: HashArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (lo, hi) = hash128(&args.name);
    let uuid = ContainerUuid::from_name(&args.name);
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "name": args.name, "lo": lo, "hi": hi, "uuid": uuid.to_hex() })
        ),
        OutputFormat::Text => {
            println!("{} {}", "Container".bold(), args.name.yellow());
            println!("  lo:   {lo:#018x}");
            println!("  hi:   {hi:#018x}");
            println!("  uuid: {}", uuid.to_hex().cyan());
        }
    }
    Ok(())
}

fn print_oid(id: &ObjectId, kind: NodeKind, format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "kind": kind.to_string(),
                "index": id.index(),
                "lo": id.lo,
                "hi": id.hi,
                "hex": id.to_hex(),
            })
        ),
        OutputFormat::Text => {
            println!("{} {}#{}", "Object".bold(), kind.to_string().green(), id.index());
            println!("  id:  {id}");
            println!("  hex: {}", id.to_hex().cyan());
        }
    }
}

fn cmd_oid_encode(args: EncodeArgs, format: &OutputFormat) -> anyhow::Result<()> {
    if args.index > INDEX_MASK {
        bail!("index {:#x} does not fit in 62 bits", args.index);
    }
    let kind = NodeKind::from(args.kind);
    let id = ObjectId::new(ObjectId::encode_lo(kind, args.index), args.hi);
    print_oid(&id, kind, format);
    Ok(())
}

fn cmd_oid_decode(args: DecodeArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let id = ObjectId::from_hex(&args.id)?;
    let kind = id.decode_kind()?;
    print_oid(&id, kind, format);
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.path.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

/// What one rank saw after building the sample namespace.
#[derive(Debug, PartialEq, Eq)]
struct RankView {
    rank: usize,
    max_index: u64,
    links: Vec<String>,
}

/// Build the sample namespace on one rank.
///
/// Every rank creates the same nodes collectively and writes its own row of
/// `/data/temps` and its own entry of `/index`.
fn build_namespace(
    pool: &InMemoryPool,
    name: &str,
    comm: Arc<dyn Communicator>,
    config: ConnectorConfig,
) -> VolResult<RankView> {
    let rank = comm.rank();
    let nranks = comm.size() as u64;
    let container = Container::create(pool, name, comm, config, &PropertyList::new())?;
    let root = container.root()?;

    let data = root.create_group("data", &PropertyList::new())?;
    let int = Datatype::int(4, true);
    let temps = data.create_dataset(
        "temps",
        &int,
        &Dataspace::new([nranks, DEMO_COLUMNS]),
        &PropertyList::new(),
    )?;
    let row: Vec<u8> = (0..DEMO_COLUMNS as i32)
        .flat_map(|c| (rank as i32 * 10 + c).to_le_bytes())
        .collect();
    let row_space = Dataspace::new([DEMO_COLUMNS]);
    temps.write(
        ElementLayout {
            ty: &int,
            space: &row_space,
            selection: &Selection::All,
        },
        &Selection::Hyperslab(vec![
            HyperslabDim::range(rank as u64, 1),
            HyperslabDim::range(0, DEMO_COLUMNS),
        ]),
        &row,
    )?;

    let units = temps.create_attribute("units", &Datatype::VarString, &Dataspace::scalar())?;
    if rank == LEADER_RANK {
        units.write_vlen(&[Some(b"celsius".as_slice())])?;
    }
    root.link_soft("latest", "/data/temps")?;

    let index = root.create_map("index", &Datatype::VarString, &Datatype::int(8, false))?;
    index.set(format!("rank-{rank}").as_bytes(), &(rank as u64).to_le_bytes())?;

    let view = RankView {
        rank,
        max_index: container.max_index(),
        links: root.links()?,
    };
    units.close()?;
    index.close()?;
    temps.close()?;
    data.close()?;
    root.close()?;
    container.close()?;
    info!(rank, "namespace built");
    Ok(view)
}

fn run_demo(
    pool: &InMemoryPool,
    name: &str,
    ranks: usize,
    config: &ConnectorConfig,
) -> anyhow::Result<Vec<RankView>> {
    if ranks == 0 {
        bail!("a group needs at least one rank");
    }
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalGroup::with_timeout(ranks, DEMO_TIMEOUT)
            .into_iter()
            .map(|comm| {
                let config = config.clone();
                s.spawn(move || build_namespace(pool, name, Arc::new(comm), config))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .map_err(|_| anyhow!("rank {rank} panicked"))?
                    .with_context(|| format!("rank {rank}"))
            })
            .collect()
    })
}

/// Summary read back on a single process once every rank is done.
struct Summary {
    objects: Vec<(String, String, ObjectId)>,
    temps: Vec<i32>,
    units: Option<String>,
    index_entries: u64,
    stats: Option<StoreStats>,
}

fn summarize(pool: &InMemoryPool, name: &str, config: ConnectorConfig) -> anyhow::Result<Summary> {
    let container = Container::open(pool, name, OpenMode::ReadOnly, Arc::new(SelfComm), config)?;
    let root = container.root()?;

    let mut objects = Vec::new();
    for link in root.links()? {
        let object = root.open_object(&link)?;
        objects.push((link, object.kind_name().to_owned(), object.id()));
        object.close()?;
    }

    let temps = root.open_dataset("latest")?;
    let int = Datatype::int(4, true);
    let mut buf = vec![0u8; temps.space().npoints() as usize * int.size()];
    temps.read(
        ElementLayout {
            ty: &int,
            space: temps.space(),
            selection: &Selection::All,
        },
        &Selection::All,
        &mut buf,
    )?;
    let values = buf
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let units = temps
        .open_attribute("units")?
        .read_vlen()?
        .into_iter()
        .next()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

    let index = root.open_map("index")?;
    let index_entries = index.count()?;

    index.close()?;
    temps.close()?;
    root.close()?;
    let stats = pool.store(container.uuid()).map(|store| store.stats());
    container.close()?;

    Ok(Summary {
        objects,
        temps: values,
        units,
        index_entries,
        stats,
    })
}

fn cmd_demo(args: DemoArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let pool = InMemoryPool::default();
    let views = run_demo(&pool, &args.container, args.ranks, &config)?;
    let summary = summarize(&pool, &args.container, config)?;

    match format {
        OutputFormat::Json => {
            let objects: Vec<_> = summary
                .objects
                .iter()
                .map(|(link, kind, id)| json!({ "link": link, "kind": kind, "id": id.to_hex() }))
                .collect();
            let max_index: Vec<_> = views.iter().map(|v| v.max_index).collect();
            println!(
                "{}",
                json!({
                    "container": args.container,
                    "ranks": args.ranks,
                    "max_index": max_index,
                    "objects": objects,
                    "temps": summary.temps,
                    "units": summary.units,
                    "index_entries": summary.index_entries,
                    "store_fetches": summary.stats.as_ref().map(|s| s.fetches),
                    "store_updates": summary.stats.as_ref().map(|s| s.updates),
                })
            );
        }
        OutputFormat::Text => {
            println!(
                "{} Built {} on {} ranks",
                "✓".green().bold(),
                args.container.yellow(),
                args.ranks
            );
            for view in &views {
                println!(
                    "  rank {}: max index {}, {} root links",
                    view.rank,
                    view.max_index,
                    view.links.len()
                );
            }
            println!("{}", "Root group".bold());
            for (link, kind, id) in &summary.objects {
                println!("  {:<8} {:<10} {}", link.cyan(), kind, id);
            }
            println!("{}", "/latest".bold());
            for row in summary.temps.chunks(DEMO_COLUMNS as usize) {
                println!("  {row:?}");
            }
            if let Some(units) = &summary.units {
                println!("  units: {}", units.green());
            }
            println!("/index: {} entries", summary.index_entries);
            if let Some(stats) = &summary.stats {
                println!(
                    "store: {} opens, {} fetches, {} updates, {} listings",
                    stats.opens, stats.fetches, stats.updates, stats.lists
                );
            }
        }
    }
    Ok(())
}
