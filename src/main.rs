use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gom::cli::{Cli, Command, CopyDirection, parse_copy_args};
use gom::config;
use gom::error::GomError;
use gom::exec::Executor;
use gom::shell::ShellType;
use gom::soap::VimSession;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("gom=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = config::load_config(&cli.config)?;

    let session = VimSession::connect(&config).await?;
    let http = session.http().clone();
    let endpoint_host = session.server.clone();
    let mut executor = Executor::new(session, http, endpoint_host, config.exec.cleanup);

    let result = run_command(&mut executor, &config, cli.command).await;

    // Best-effort logout regardless of how the command fared.
    if let Err(e) = executor.api().close().await {
        tracing::warn!(error = %e, "failed to close vCenter session");
    }

    let exit_code = result?;

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run_command(
    executor: &mut Executor<VimSession>,
    config: &config::Config,
    command: Command,
) -> Result<i32, GomError> {
    match command {
        Command::Exec {
            shell,
            timeout,
            command,
        } => {
            let shell = match shell {
                Some(name) => ShellType::from_str(&name)?,
                None => config.shell_type()?,
            };
            let timeout = Duration::from_secs(timeout.unwrap_or(config.exec.timeout_s));

            let result = executor.run(&command.join(" "), shell, timeout).await?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);

            match result.exit_code {
                Some(code) => Ok(code),
                None => {
                    tracing::debug!("exit code unavailable; process already reaped");
                    Ok(0)
                }
            }
        }
        Command::Cp { src, dst } => {
            match parse_copy_args(&src, &dst)? {
                CopyDirection::Upload { local, guest } => {
                    let contents = tokio::fs::read(&local).await.map_err(|source| GomError::Io {
                        context: format!("reading {}", local.display()),
                        source,
                    })?;
                    executor.transfer().upload(&guest, &contents).await?;
                    println!("{} -> :{guest} ({} bytes)", local.display(), contents.len());
                }
                CopyDirection::Download { guest, local } => {
                    let contents = executor.transfer().download(&guest).await?;
                    tokio::fs::write(&local, &contents)
                        .await
                        .map_err(|source| GomError::Io {
                            context: format!("writing {}", local.display()),
                            source,
                        })?;
                    println!(":{guest} -> {} ({} bytes)", local.display(), contents.len());
                }
            }
            Ok(0)
        }
        Command::Exists { path } => {
            if executor.transfer().exists(&path).await {
                println!("{path}: exists");
                Ok(0)
            } else {
                println!("{path}: not found");
                Ok(1)
            }
        }
        Command::Rm { path } => {
            if executor.transfer().delete(&path).await? {
                println!("removed {path}");
            } else {
                println!("{path}: not found");
            }
            Ok(0)
        }
        Command::Rmdir {
            path,
            no_recursive,
        } => {
            if executor.transfer().delete_directory(&path, !no_recursive).await? {
                println!("removed {path}");
            } else {
                println!("{path}: not removed");
            }
            Ok(0)
        }
    }
}
