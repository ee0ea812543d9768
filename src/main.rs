use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use seat_predictor::aggregator;
use seat_predictor::extractor::ReportExtractor;
use seat_predictor::lookup::{InferenceTable, Selection};
use seat_predictor::models::Config;
use seat_predictor::query_log::QueryLogSink;
use seat_predictor::session::PredictionSession;
use seat_predictor::telemetry;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn cli() -> Command {
    let table_arg = Arg::new("table")
        .long("table")
        .value_name("FILE")
        .help("Inference table produced by `aggregate`");

    Command::new("seat-predictor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Predicts probable college allotments from past allotment reports")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("extract")
                .about("Parse the allotment report text into a raw allotment CSV")
                .arg(Arg::new("input").long("input").value_name("FILE").help("Report text"))
                .arg(Arg::new("output").long("output").value_name("FILE").help("Raw allotment CSV"))
                .arg(
                    Arg::new("skipped")
                        .long("skipped")
                        .value_name("FILE")
                        .help("Where unparsed lines are written"),
                ),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Summarize allotments per college, category, gender and entry channel")
                .arg(Arg::new("input").long("input").value_name("FILE").help("Allotment CSV"))
                .arg(Arg::new("output").long("output").value_name("FILE").help("Inference table")),
        )
        .subcommand(
            Command::new("predict")
                .about("List colleges a rank could be allotted to")
                .arg(
                    Arg::new("rank")
                        .short('r')
                        .long("rank")
                        .value_name("RANK")
                        .required(true)
                        .value_parser(value_parser!(u32).range(1..))
                        .help("Your rank"),
                )
                .arg(Arg::new("category").long("category").help("Candidate category (default OPEN)"))
                .arg(Arg::new("gender").long("gender").help("Gender (default GEN)"))
                .arg(Arg::new("channel").long("channel").help("Entry channel (default GEN)"))
                .arg(table_arg.clone()),
        )
        .subcommand(
            Command::new("interactive")
                .about("Prompt for queries until end of input")
                .arg(table_arg.clone()),
        )
        .subcommand(
            Command::new("options")
                .about("List the categories, genders and entry channels in the table")
                .arg(table_arg),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let matches = cli().get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");
    let config = load_or_create_config(config_file)?;

    telemetry::init(&config)?;

    match matches.subcommand() {
        Some(("extract", args)) => run_extract(&config, args),
        Some(("aggregate", args)) => run_aggregate(&config, args),
        Some(("predict", args)) => run_predict(&config, args).await,
        Some(("interactive", args)) => run_interactive(&config, args).await,
        Some(("options", args)) => run_options(&config, args),
        _ => unreachable!("clap enforces a subcommand"),
    }
}

fn load_or_create_config(config_file: &str) -> Result<Config> {
    if Path::new(config_file).exists() {
        eprintln!("📋 Loading configuration from: {}", config_file);
        return Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file));
    }

    eprintln!("📝 Creating default configuration file: {}", config_file);
    let config = Config::default();
    config.save_to_file(config_file)?;
    Ok(config)
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str, fallback: &'a str) -> &'a str {
    args.get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or(fallback)
}

fn run_extract(config: &Config, args: &ArgMatches) -> Result<()> {
    let input = path_arg(args, "input", &config.paths.report);
    let output = path_arg(args, "output", &config.paths.raw_csv);
    let skipped = path_arg(args, "skipped", &config.paths.skipped);

    println!("📄 Extracting allotments from: {}", input);
    let extraction = ReportExtractor::new().extract_file(input)?;
    extraction.write_records_csv(output)?;
    extraction.write_skipped(skipped)?;

    tracing::info!(
        candidates = extraction.candidate_lines(),
        saved = extraction.records.len(),
        skipped = extraction.skipped.len(),
        "extraction finished"
    );
    println!("✅ Done. Saved {} rows to {}", extraction.records.len(), output);
    println!("⚠️  Skipped {} rows to {}", extraction.skipped.len(), skipped);
    Ok(())
}

fn run_aggregate(config: &Config, args: &ArgMatches) -> Result<()> {
    let input = path_arg(args, "input", &config.paths.aggregate_input);
    let output = path_arg(args, "output", &config.paths.inference_table);

    println!("📂 Reading allotments from: {}", input);
    let rows = aggregator::read_allotments_file(input)?;
    let groups = aggregator::aggregate(&rows);
    aggregator::write_groups_file(&groups, output)?;

    tracing::info!(rows = rows.len(), groups = groups.len(), "aggregation finished");
    println!(
        "✅ {} generated with {} college/category/gender/entry sets from {} allotments.",
        output,
        groups.len(),
        rows.len()
    );
    Ok(())
}

fn load_session(config: &Config, args: &ArgMatches) -> Result<PredictionSession> {
    let table_path = path_arg(args, "table", &config.paths.inference_table);
    let table = InferenceTable::load(table_path)?;
    let sink = QueryLogSink::from_config(&config.query_log)?;
    tracing::info!(
        groups = table.groups().len(),
        log = %sink.describe(),
        "inference table loaded"
    );
    Ok(PredictionSession::new(table, sink))
}

async fn run_predict(config: &Config, args: &ArgMatches) -> Result<()> {
    let session = load_session(config, args)?;
    let defaults = session
        .table()
        .default_selection()
        .context("inference table is empty")?;

    let choose = |name: &str, fallback: String| {
        args.get_one::<String>(name).cloned().unwrap_or(fallback)
    };
    let selection = Selection {
        category: choose("category", defaults.category),
        gender: choose("gender", defaults.gender),
        entry_channel: choose("channel", defaults.entry_channel),
    };
    let rank = *args.get_one::<u32>("rank").context("rank is required")?;

    let query = session.table().query(rank, selection)?;
    session.submit(query, &mut io::stdout()).await?;
    Ok(())
}

async fn run_interactive(config: &Config, args: &ArgMatches) -> Result<()> {
    let session = load_session(config, args)?;
    let Some(defaults) = session.table().default_selection() else {
        println!("❌ The inference table has no rows to query.");
        return Ok(());
    };

    println!("🎓 College Predictor");
    println!("Enter your details (press Enter to keep the value in brackets, Ctrl-D to quit).");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let table = session.table();

    loop {
        println!();
        let Some(category) = prompt_choice(&mut input, "Candidate Category", table.categories(), &defaults.category)? else {
            break;
        };
        let Some(gender) = prompt_choice(&mut input, "Gender", table.genders(), &defaults.gender)? else {
            break;
        };
        let Some(entry_channel) = prompt_choice(&mut input, "Entry Channel", table.entry_channels(), &defaults.entry_channel)? else {
            break;
        };
        let Some(rank) = prompt_rank(&mut input)? else {
            break;
        };

        let selection = Selection {
            category,
            gender,
            entry_channel,
        };
        match table.query(rank, selection) {
            Ok(query) => {
                session.submit(query, &mut io::stdout()).await?;
            }
            Err(err) => println!("❌ {}", err),
        }
    }

    println!("\n👋 Bye");
    Ok(())
}

fn run_options(config: &Config, args: &ArgMatches) -> Result<()> {
    let table_path = path_arg(args, "table", &config.paths.inference_table);
    let table = InferenceTable::load(table_path)?;

    println!("Candidate Category: {}", table.categories().join(", "));
    println!("Gender: {}", table.genders().join(", "));
    println!("Entry Channel: {}", table.entry_channels().join(", "));
    Ok(())
}

/// Reads a line, `None` on end of input.
fn read_answer<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn prompt_choice<R: BufRead>(
    input: &mut R,
    label: &str,
    options: &[String],
    default: &str,
) -> Result<Option<String>> {
    loop {
        println!("{}: {}", label, options.join(", "));
        print!("  choose [{}]: ", default);
        let Some(answer) = read_answer(input)? else {
            return Ok(None);
        };
        if answer.is_empty() {
            return Ok(Some(default.to_string()));
        }
        if options.contains(&answer) {
            return Ok(Some(answer));
        }
        println!("  ❌ '{}' is not one of the listed values", answer);
    }
}

fn prompt_rank<R: BufRead>(input: &mut R) -> Result<Option<u32>> {
    loop {
        print!("Your Rank: ");
        let Some(answer) = read_answer(input)? else {
            return Ok(None);
        };
        match answer.parse::<u32>() {
            Ok(rank) if rank >= 1 => return Ok(Some(rank)),
            _ => println!("  ❌ rank must be a whole number of at least 1"),
        }
    }
}
