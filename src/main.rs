use anyhow::Context;
use devbox::cli::{Args, CommandContext, execute};
use devbox::config::EnvSnapshot;
use devbox::error::Notice;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v
    let default_filter = if args.verbose { "devbox=debug" } else { "devbox=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let context = CommandContext::from_args(&args, EnvSnapshot::capture())
        .context("cannot determine the project directory")?;
    debug!("Project directory: {:?}", context.project_root);

    let mut notices = Vec::new();
    let result = execute(&args, &context, &mut notices).await;
    print_notices(&notices);

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            if let Some(output) = e.output() {
                eprintln!();
                for line in output.lines() {
                    eprintln!("  | {}", line);
                }
                eprintln!();
            }
            eprintln!("hint: {}", e.remediation());
            e.exit_code()
        }
    };

    std::process::exit(code);
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        eprintln!("warning: {}", notice);
        if let Some(remediation) = notice.remediation() {
            eprintln!("  hint: {}", remediation);
        }
    }
}
