use clap::{ArgAction, Parser, Subcommand};
use futures::TryStreamExt;
use riak_http::{Client, ClientConfig, KeysMode, Metadata, Payload, RObject, SaveOptions};
use serde_json::Value;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "riak_http=info,riak_cli=info";

#[derive(Parser, Debug)]
#[command(name = "riak-cli")]
#[command(about = "Command-line client for Riak's HTTP interface")]
struct Cli {
    /// Node URL; falls back to RIAK_HTTP_BASE_URL, then http://127.0.0.1:8098.
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Ping,
    Stats,
    /// List bucket names.
    Buckets,
    Keys(KeysArgs),
    Get(ObjectArgs),
    Put(PutArgs),
    Delete(ObjectArgs),
    Exists(ObjectArgs),
}

#[derive(clap::Args, Debug)]
struct KeysArgs {
    bucket: String,
    /// Print key batches as they stream in.
    #[arg(long, action = ArgAction::SetTrue)]
    stream: bool,
}

#[derive(clap::Args, Debug)]
struct ObjectArgs {
    bucket: String,
    key: String,
}

#[derive(clap::Args, Debug)]
struct PutArgs {
    bucket: String,
    /// Omit to let Riak assign a key.
    key: Option<String>,
    #[arg(long)]
    data: String,
    #[arg(long, default_value = "application/json")]
    content_type: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let client = match build_client(cli.base_url) {
        Ok(client) => client,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Commands::Ping => ping_command(&client).await,
        Commands::Stats => stats_command(&client).await,
        Commands::Buckets => buckets_command(&client).await,
        Commands::Keys(args) => keys_command(&client, args).await,
        Commands::Get(args) => get_command(&client, args).await,
        Commands::Put(args) => put_command(&client, args).await,
        Commands::Delete(args) => delete_command(&client, args).await,
        Commands::Exists(args) => exists_command(&client, args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_client(base_url: Option<String>) -> Result<Client, String> {
    let mut config = ClientConfig::from_env();
    if let Some(base_url) = base_url.filter(|value| !value.trim().is_empty()) {
        config.base_url = base_url;
    }
    tracing::debug!(
        base_url = %config.base_url,
        tls = config.uses_tls(),
        "riak-cli client configured"
    );
    Client::new(config).map_err(|error| error.to_string())
}

async fn ping_command(client: &Client) -> Result<ExitCode, String> {
    let pong = client.ping().await.map_err(|error| error.to_string())?;
    print_payload(&pong)?;
    Ok(ExitCode::SUCCESS)
}

async fn stats_command(client: &Client) -> Result<ExitCode, String> {
    let stats = client.stats().await.map_err(|error| error.to_string())?;
    print_payload(&stats)?;
    Ok(ExitCode::SUCCESS)
}

async fn buckets_command(client: &Client) -> Result<ExitCode, String> {
    let names = client
        .buckets()
        .list()
        .await
        .map_err(|error| error.to_string())?;
    for name in names {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn keys_command(client: &Client, args: KeysArgs) -> Result<ExitCode, String> {
    let buckets = client.buckets();
    if !args.stream {
        let keys = buckets
            .keys(&args.bucket, KeysMode::Batch)
            .await
            .map_err(|error| error.to_string())?;
        for key in keys {
            println!("{key}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut batches = buckets
        .keys_stream(&args.bucket)
        .await
        .map_err(|error| error.to_string())?;
    while let Some(batch) = batches.try_next().await.map_err(|error| error.to_string())? {
        for key in batch {
            println!("{key}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn get_command(client: &Client, args: ObjectArgs) -> Result<ExitCode, String> {
    let object = client
        .buckets()
        .get(args.bucket.as_str())
        .objects()
        .get(&args.key)
        .await
        .map_err(|error| error.to_string())?;

    let Some(object) = object else {
        eprintln!("not found: {}/{}", args.bucket, args.key);
        return Ok(ExitCode::from(2));
    };
    print_object(&object)?;
    Ok(ExitCode::SUCCESS)
}

async fn put_command(client: &Client, args: PutArgs) -> Result<ExitCode, String> {
    let data = if args.content_type.starts_with("application/json") {
        let value: Value = serde_json::from_str(&args.data)
            .map_err(|error| format!("--data is not valid json: {error}"))?;
        Payload::Json(value)
    } else {
        Payload::Text(args.data)
    };
    let options =
        SaveOptions::new().with_metadata(Metadata::new().with_content_type(args.content_type));

    let saved = client
        .objects()
        .save(&args.bucket, args.key.as_deref(), data, options)
        .await
        .map_err(|error| error.to_string())?;
    println!("{}", saved.key);
    Ok(ExitCode::SUCCESS)
}

async fn delete_command(client: &Client, args: ObjectArgs) -> Result<ExitCode, String> {
    client
        .objects()
        .delete(&args.bucket, &args.key)
        .await
        .map_err(|error| error.to_string())?;
    Ok(ExitCode::SUCCESS)
}

async fn exists_command(client: &Client, args: ObjectArgs) -> Result<ExitCode, String> {
    let exists = client
        .objects()
        .exists(&args.bucket, &args.key)
        .await
        .map_err(|error| error.to_string())?;
    println!("{exists}");
    Ok(if exists {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn print_object(object: &RObject) -> Result<(), String> {
    let metadata =
        serde_json::to_string(&object.metadata).map_err(|error| error.to_string())?;
    eprintln!("metadata: {metadata}");
    print_payload(&object.data)
}

fn print_payload(payload: &Payload) -> Result<(), String> {
    match payload {
        Payload::Empty => {}
        Payload::Json(value) => {
            let pretty = serde_json::to_string_pretty(value).map_err(|error| error.to_string())?;
            println!("{pretty}");
        }
        Payload::Text(text) => println!("{text}"),
        Payload::Raw(bytes) => println!("<{} bytes>", bytes.len()),
    }
    Ok(())
}
