use clap::{Args, Parser as ClapParser, Subcommand};
use schedview::hierarchy::render_tree;
use schedview::{Category, Context, EntryKind, FilterChain, FilterConfig, TaskId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};

#[derive(ClapParser)]
#[command(name = "schedview")]
#[command(about = "Explore schedule traces from deterministic concurrency testers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Keep only events matching EXPR (repeatable), e.g. `!task=3` or `fn~worker`
    #[arg(short, long = "filter", value_name = "EXPR")]
    filters: Vec<String>,

    /// Show a category hidden by default (schedule, tick, semaphore, task, random)
    #[arg(long, value_name = "CATEGORY")]
    show: Vec<String>,

    /// Hide a category
    #[arg(long, value_name = "CATEGORY")]
    hide: Vec<String>,

    /// JSON filter preset applied before the flags above
    #[arg(long = "filters", value_name = "FILE")]
    preset: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize tasks, objects and kept events
    Summary {
        /// Input trace file
        #[arg(value_name = "FILE")]
        input: String,

        #[command(flatten)]
        filter: FilterArgs,

        /// Pretty print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Print the task/object hierarchy
    Tree {
        /// Input trace file
        #[arg(value_name = "FILE")]
        input: String,

        /// Open every row instead of collapsing deep ones
        #[arg(short, long)]
        expand: bool,
    },

    /// Query the zoom tree of one task
    Zoom {
        /// Input trace file
        #[arg(value_name = "FILE")]
        input: String,

        /// Task whose row is queried
        #[arg(short, long)]
        task: TaskId,

        /// First kept index of the window
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// Last kept index of the window (default: end of trace)
        #[arg(long)]
        to: Option<usize>,

        /// Deepest tree level to descend to
        #[arg(short, long, default_value_t = usize::MAX)]
        depth: usize,

        #[command(flatten)]
        filter: FilterArgs,

        /// Pretty print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Show a single event
    Event {
        /// Input trace file
        #[arg(value_name = "FILE")]
        input: String,

        /// Event index in the trace
        #[arg(value_name = "ID")]
        id: usize,

        /// Pretty print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

#[derive(Serialize)]
struct Summary {
    tasks: usize,
    futures: usize,
    objects: usize,
    shared_objects: usize,
    events: usize,
    kept_events: usize,
    per_category: BTreeMap<Category, usize>,
    per_category_kept: BTreeMap<Category, usize>,
    filters: Vec<FilterSummary>,
}

#[derive(Serialize)]
struct FilterSummary {
    title: String,
    enabled: bool,
    rejected: usize,
}

#[derive(Serialize)]
struct EventSummary<'a> {
    description: String,
    #[serde(flatten)]
    event: &'a schedview::Event,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Summary {
            input,
            filter,
            pretty,
        } => summary(&input, &filter, pretty),
        Commands::Tree { input, expand } => tree(&input, expand),
        Commands::Zoom {
            input,
            task,
            from,
            to,
            depth,
            filter,
            pretty,
        } => zoom(&input, task, from, to, depth, &filter, pretty),
        Commands::Event { input, id, pretty } => event(&input, id, pretty),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// Log to a file in the cache directory, only when RUST_LOG is set
fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        return;
    }

    let log_dir = dirs::cache_dir()
        .or_else(dirs::state_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("schedview");

    let log_file = fs::create_dir_all(&log_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("schedview.log"))
    });

    match log_file {
        Ok(file) => {
            env_logger::Builder::new()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .parse_default_env()
                .init();
            log::info!("Starting schedview - log dir: {}", log_dir.display());
        }
        Err(e) => eprintln!("Warning: failed to open log file: {}", e),
    }
}

fn build_chain(args: &FilterArgs) -> Result<FilterChain, String> {
    let mut chain = FilterChain::default();

    if let Some(path) = &args.preset {
        FilterConfig::load(path)
            .and_then(|config| config.apply_to(&mut chain))
            .map_err(|e| e.to_string())?;
    }

    for (names, enabled) in [(&args.show, true), (&args.hide, false)] {
        for name in names {
            let category = Category::from_name(name)
                .ok_or_else(|| format!("Unknown category '{}'", name))?;
            chain.set_category(category, enabled);
        }
    }

    for expr in &args.filters {
        chain.add_expr(expr).map_err(|e| e.to_string())?;
    }

    Ok(chain)
}

fn load(input: &str, chain: &mut FilterChain) -> Result<Context, String> {
    Context::load_file(input, chain).map_err(|e| format!("Error loading {}: {}", input, e))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    let json = json.map_err(|e| format!("Error serializing to JSON: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn summary(input: &str, args: &FilterArgs, pretty: bool) -> Result<(), String> {
    let mut chain = build_chain(args)?;
    let ctx = load(input, &mut chain)?;
    let graph = ctx.graph();
    let result = ctx.filter_result();

    let summary = Summary {
        tasks: graph.tasks.len(),
        futures: graph.tasks.iter().filter(|t| t.is_future).count(),
        objects: graph.objects.len(),
        shared_objects: ctx
            .hierarchy()
            .entries()
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Object(_)))
            .count(),
        events: graph.events.len(),
        kept_events: result.kept_count,
        per_category: result.per_category_totals.clone(),
        per_category_kept: result.per_category_counts.clone(),
        filters: chain
            .filters()
            .iter()
            .map(|f| FilterSummary {
                title: f.title.clone(),
                enabled: f.enabled,
                rejected: f.rejected,
            })
            .collect(),
    };

    print_json(&summary, pretty)
}

fn tree(input: &str, expand: bool) -> Result<(), String> {
    let mut ctx = load(input, &mut FilterChain::default())?;
    if expand {
        ctx.hierarchy_mut().expand_all();
    }
    for line in render_tree(ctx.hierarchy()) {
        println!("{}", line);
    }
    Ok(())
}

fn zoom(
    input: &str,
    task: TaskId,
    from: usize,
    to: Option<usize>,
    depth: usize,
    args: &FilterArgs,
    pretty: bool,
) -> Result<(), String> {
    let mut chain = build_chain(args)?;
    let ctx = load(input, &mut chain)?;
    let to = to.unwrap_or_else(|| ctx.zoom_index().top_size().saturating_sub(1));

    let nodes = ctx
        .zoom_query_task(task, from..=to, depth)
        .map_err(|e| e.to_string())?;
    print_json(&nodes, pretty)
}

fn event(input: &str, id: usize, pretty: bool) -> Result<(), String> {
    let ctx = load(input, &mut FilterChain::default())?;
    let event = ctx.get_event(id).map_err(|e| e.to_string())?;

    print_json(
        &EventSummary {
            description: event.describe(),
            event,
        },
        pretty,
    )
}
