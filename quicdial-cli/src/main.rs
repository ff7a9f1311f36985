// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
#![warn(unused_imports)]

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use validators::{
  parse_socketaddr, validate_destination, validate_existing_file, validate_socketaddr,
};

mod certgen;
mod client;
mod server;
mod tls;
mod validators;

fn main() {
  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quinn=warn,quinn_proto=warn,info"));
  let collector = tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .finish();
  tracing::subscriber::set_global_default(collector).expect("Logger init must succeed");
  let app = Command::new(env!("CARGO_BIN_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .subcommand(
      Command::new("dial")
        .about("Open one stream to a relay and pipe it through stdin and stdout")
        .arg(
          Arg::new("authority")
            .long("authority")
            .short('a')
            .help("PEM certificate to trust instead of the platform roots")
            .validator(validate_existing_file)
            .takes_value(true)
            .required(false),
        )
        .arg(
          Arg::new("san")
            .long("san")
            .short('s')
            .help("TLS server name to present instead of the target's host")
            .takes_value(true)
            .required(false),
        )
        .arg(
          Arg::new("config")
            .long("config")
            .help("JSON dialer configuration")
            .validator(validate_existing_file)
            .takes_value(true)
            .required(false),
        )
        .arg(
          Arg::new("target")
            .long("target")
            .short('t')
            .validator(validate_destination)
            .takes_value(true)
            .required(true),
        ),
    )
    .subcommand(
      Command::new("echo")
        .about("Accept relay sessions and echo every stream back to its sender")
        .arg(
          Arg::new("cert")
            .long("cert")
            .short('c')
            .validator(validate_existing_file)
            .takes_value(true)
            .required(true),
        )
        .arg(
          Arg::new("key")
            .long("key")
            .short('k')
            .validator(validate_existing_file)
            .takes_value(true)
            .required(true),
        )
        .arg(
          Arg::new("quic")
            .long("quic")
            .short('q')
            .validator(validate_socketaddr)
            .default_value("127.0.0.1:9090")
            .takes_value(true),
        )
        .arg(
          Arg::new("alpn")
            .long("alpn")
            .default_value("relay")
            .takes_value(true),
        ),
    )
    .subcommand(
      Command::new("cert")
        .about("Generate self-signed certificates for local usage")
        .arg(Arg::new("path").takes_value(true).required(true))
        .arg(
          Arg::new("san")
            .long("san")
            .takes_value(true)
            .required(false)
            .default_value("localhost"),
        ),
    )
    .subcommand_required(true)
    .arg_required_else_help(true);
  let matches = app.get_matches();
  let mode = matches.subcommand_name().unwrap_or("<No subcommand?>");
  let handler = main_args_handler(&matches);
  let rt = tokio::runtime::Builder::new_multi_thread()
    .thread_name("tokio-reactor-worker")
    .enable_all()
    .build()
    .expect("Tokio Runtime setup failure");
  match rt.block_on(handler) {
    Err(err) => {
      tracing::error!(mode = mode, err = ?err, "dispatch_command_failure");
      std::process::exit(1);
    }
    Ok(_) => tracing::info!("{} exited successfully", mode),
  }
}

fn dial_arg_handling(args: &'_ ArgMatches) -> Result<client::DialArgs> {
  Ok(client::DialArgs {
    authority_cert: args.value_of("authority").map(PathBuf::from),
    server_name: args.value_of("san").map(String::from),
    config: args.value_of("config").map(PathBuf::from),
    target: args
      .value_of("target")
      .ok_or_else(|| anyhow::Error::msg("Target argument is required"))?
      .into(),
  })
}

fn echo_arg_handling(args: &'_ ArgMatches) -> Result<server::EchoArgs> {
  let required = |name: &str| {
    args
      .value_of(name)
      .ok_or_else(|| anyhow::Error::msg(format!("{} argument is required", name)))
  };
  Ok(server::EchoArgs {
    cert: PathBuf::from(required("cert")?),
    key: PathBuf::from(required("key")?),
    quinn_bind_addr: parse_socketaddr(required("quic")?)?,
    alpn: required("alpn")?.into(),
  })
}

async fn main_args_handler(matches: &'_ ArgMatches) -> Result<()> {
  match matches
    .subcommand()
    .expect("Subcommand is marked as required")
  {
    ("dial", opts) => {
      let config = dial_arg_handling(opts)?;
      tracing::debug!("Dialing with config {:#?}", config);
      client::dial_main(config).await
    }
    ("echo", opts) => {
      let config = echo_arg_handling(opts)?;
      tracing::info!("Running echo endpoint with config {:#?}", config);
      server::echo_main(config).await
    }
    ("cert", opts) => {
      tracing::info!("Generating certs...");
      let path_raw = opts.value_of("path").expect("Path argument is required");
      let san = opts.value_of("san").expect("SAN argument must exist");
      certgen::certgen_main(path_raw.into(), san.into()).await
    }
    (_, _) => unreachable!(),
  }
}
