use fracture_detector::{
    common::config::DEFAULT_CONFIG_PATH,
    ClassifierWorker, Config, CredentialStore, DetectorError, InferencePipeline, OnnxClassifier,
    SessionController,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fracture-detector")]
#[command(about = "X-ray fracture classification with local user accounts")]
struct Cli {
    /// Enable verbose development logging
    #[arg(long, global = true)]
    dev: bool,

    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user database if it does not exist
    Init,
    /// Register a new user
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Check a username and password
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in and classify one image
    Classify {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        /// Image file to classify
        image: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let config = Config::load_or_default(&cli.config)?;
    let store = CredentialStore::new(&config.storage.database_path, config.auth.password_scheme);

    match cli.command {
        Commands::Init => {
            store.initialize()?;
            println!("User database ready at {}", store.path().display());
        }
        Commands::Register { username, password } => {
            match store.register(&username, &password) {
                Ok(true) => println!("Registered {}", username),
                Ok(false) => bail!("Username already exists: {}", username),
                Err(DetectorError::Validation(_)) => bail!("All fields are required"),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Login { username, password } => {
            if store.authenticate(&username, &password)? {
                println!("Login successful");
            } else {
                bail!("Invalid username or password");
            }
        }
        Commands::Classify { username, password, image, json } => {
            let model_config = config.clone();
            let worker = ClassifierWorker::spawn(
                move || OnnxClassifier::new(&model_config),
                InferencePipeline::new(&config.inference),
            )?;

            let mut session = SessionController::new(store, worker);
            if !session.login(&username, &password)? {
                bail!("Invalid username or password");
            }

            let result = session.classify(&image)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} ({:.2})", result.label, result.confidence);
            }
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .init();
    }
}
