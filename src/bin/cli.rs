use ansi_term::Colour;
use clap::{Parser, Subcommand};
use cli_table::{Cell, Style, Table};

#[tokio::main]
async fn main() {
    banner("L402 toll CLI tool");
    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { url } => {
            if let Err(e) = app_stats(&url).await {
                eprintln!("{}", Colour::Red.paint(format!("error: {e}")));
                std::process::exit(1);
            }
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "L402 toll gate management CLI tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetches usage stats from a running gate's dashboard endpoint.
    Stats {
        #[arg(long, default_value = "http://localhost:3030/dashboard.json")]
        url: String,
    },
}

/// Prints out the `cli` tool banner.
fn banner(quote: &str) {
    const BOLT: &str = r"
        ──▄▄█▀▀▀▀▀█▄▄──
        ▄█▀░░▄░▄░░░░▀█▄
        █░░░▀█▀▀▀▀▄░░░█
        █░░░░█▄▄▄▄▀░░░█
        █░░░░█░░░░█░░░█
        ▀█▄░▀▀█▀█▀░░▄█▀
        ──▀▀█▄▄▄▄▄█▀▀──";
    let text = format!("{:-^34}\n{}\n", quote, Colour::Yellow.paint(BOLT));
    println!("{}", text);
}

async fn app_stats(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stats: l402_toll::stats::ToolStats = reqwest::get(url).await?.json().await?;

    println!(
        "total revenue: {} sats    total requests: {}    paid: {}    unique payers: {}\n",
        stats.total_revenue, stats.total_requests, stats.total_paid, stats.unique_payers
    );

    let mut rows: Vec<_> = stats.endpoints.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let table = rows
        .into_iter()
        .map(|(path, s)| {
            vec![
                path.clone().cell(),
                s.revenue.cell(),
                s.requests.cell(),
                s.paid.cell(),
                s.free.cell(),
            ]
        })
        .table()
        .title(vec![
            "endpoint".cell().bold(true),
            "revenue".cell().bold(true),
            "requests".cell().bold(true),
            "paid".cell().bold(true),
            "free".cell().bold(true),
        ]);

    println!("{}", table.display()?);
    Ok(())
}
