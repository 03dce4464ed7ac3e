//! relayprobe — latency prober for encrypted relay share links.
//!
//! Accepts ss:// ssr:// vmess:// trojan:// links on the command line or
//! from a file, probes each through its tunnel and prints the elapsed
//! milliseconds.

mod logging;

use anyhow::Context;
use clap::Parser;

use rp_core::dns::{set_default_resolver, SystemResolver};
use rp_links::check_link;

#[derive(Parser, Debug)]
#[command(name = "relayprobe", about = "Probe relay latency through its tunnel", version)]
struct Args {
    /// Share links to probe (ss:// ssr:// vmess:// trojan://).
    links: Vec<String>,

    /// File with one share link per line; `#` lines are skipped.
    #[arg(long)]
    file: Option<std::path::PathBuf>,

    /// Attempts per link, with exponential backoff between them.
    #[arg(long, default_value_t = 2)]
    attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    set_default_resolver(std::sync::Arc::new(SystemResolver));

    let mut links: Vec<String> = args
        .links
        .iter()
        .filter(|l| check_link(l).is_some())
        .cloned()
        .collect();
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        links.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .filter(|l| check_link(l).is_some())
                .map(str::to_string),
        );
    }
    if links.is_empty() {
        anyhow::bail!("no usable share links given (ss:// ssr:// vmess:// trojan://)");
    }

    let attempts = args.attempts.max(1);
    let mut failures = 0usize;
    for link in &links {
        let label = rp_links::parse_link(link)
            .ok()
            .map(|o| {
                o.remark()
                    .map(str::to_string)
                    .unwrap_or_else(|| o.server().to_string())
            })
            .unwrap_or_else(|| link.clone());
        match rp_adapters::ping_link(link, attempts).await {
            Ok(elapsed) => println!("{label}\t{elapsed}ms"),
            Err(err) => {
                failures += 1;
                println!("{label}\terror: {err}");
            }
        }
    }

    if failures == links.len() {
        std::process::exit(1);
    }
    Ok(())
}
