use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use stackable_operator::{
    YamlSchema,
    kube::{self, CustomResourceExt},
    shared::yaml::SerializeOptions,
    telemetry::{Tracing, tracing::TelemetryOptions},
};
use tracing::info_span;
use tracing_futures::Instrument;

use crate::{
    crd::{SparkApplication, constants::*},
    store::KubeStore,
    submit::{RunIdentity, SubmitEnvironment},
};

mod crd;
mod driver_pod;
mod driver_service;
mod local_dirs;
mod properties;
mod resources;
mod store;
mod submit;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the SparkApplication CustomResourceDefinition
    Crd,
    /// Create the driver ConfigMap, Pod and Service of a SparkApplication
    Submit(SubmitArgs),
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// YAML file holding the SparkApplication
    #[arg(long, short)]
    file: PathBuf,

    /// Identifies this submission in the labels of the driver pod
    #[arg(long)]
    submission_id: String,

    #[arg(long, env = ENV_KUBERNETES_SERVICE_HOST, default_value = DEFAULT_KUBERNETES_SERVICE_HOST)]
    kubernetes_service_host: String,

    #[arg(long, env = ENV_KUBERNETES_SERVICE_PORT, default_value = DEFAULT_KUBERNETES_SERVICE_PORT)]
    kubernetes_service_port: String,

    #[arg(long, env = ENV_SPARK_USER, default_value = DEFAULT_SPARK_USER)]
    spark_user: String,

    /// Spark defaults, skipped if the file does not exist
    #[arg(long, default_value = SPARK_DEFAULTS_FILE_PATH)]
    spark_defaults_file: PathBuf,

    #[command(flatten)]
    telemetry: TelemetryOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Cmd::Crd => {
            SparkApplication::crd()
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())?;
        }
        Cmd::Submit(args) => {
            let _tracing_guard =
                Tracing::pre_configured(built_info::PKG_NAME, args.telemetry).init()?;

            tracing::info!(
                built_info.pkg_version = built_info::PKG_VERSION,
                built_info.git_version = built_info::GIT_VERSION,
                built_info.target = built_info::TARGET,
                built_info.built_time_utc = built_info::BUILT_TIME_UTC,
                built_info.rustc_version = built_info::RUSTC_VERSION,
                "Starting {description}",
                description = built_info::PKG_DESCRIPTION
            );

            let spark_application: SparkApplication = serde_yaml::from_str(
                &std::fs::read_to_string(&args.file)
                    .with_context(|| format!("failed to read {}", args.file.display()))?,
            )
            .with_context(|| format!("failed to parse {}", args.file.display()))?;

            let environment = SubmitEnvironment {
                kubernetes_service_host: args.kubernetes_service_host,
                kubernetes_service_port: args.kubernetes_service_port,
                spark_user: args.spark_user,
                defaults_file: args.spark_defaults_file,
            };
            let identity = RunIdentity::new(&spark_application, &args.submission_id);
            let store = KubeStore::new(kube::Client::try_default().await?);

            let report = submit::submit(
                &store,
                &spark_application,
                &identity,
                &environment,
                Utc::now(),
            )
            .instrument(info_span!("submit", run_id = %identity.run_id))
            .await
            .inspect_err(|error| {
                tracing::error!(
                    category = error.category(),
                    error = error as &dyn std::error::Error,
                    "Submission failed"
                )
            })?;

            println!("{}", report.run_id);
        }
    }

    Ok(())
}
