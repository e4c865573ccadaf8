use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing::info;

mod mac;
mod nut;
mod reply;

use nut::NutCipher;
use reply::ReplyBuilder;

#[derive(Parser)]
#[command(name = "sqrl-server")]
#[command(about = "Reference server-side nut engine and reply builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a fresh challenge URL from a template
    MintChallenge {
        #[arg(long)]
        sfn: String,
        #[arg(long, default_value = "https://example.com/sqrl?nut=_LIBSQRL_NUT_&sfn=_LIBSQRL_SFN_")]
        template: String,
        #[arg(long, default_value_t = 0)]
        client_ip: u32,
        /// Derives the nut key deterministically; a random key is used if omitted
        #[arg(long)]
        passcode: Option<String>,
    },
    /// Build a MAC-protected reply body for a given nut and TIF
    BuildReply {
        #[arg(long)]
        nut_hex: String,
        /// TIF bits, hex (e.g. "05")
        #[arg(long)]
        tif: String,
        #[arg(long)]
        qry: String,
        #[arg(long)]
        passcode: String,
    },
}

fn now_micros() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros() as u64)
}

fn mac_key(passcode: &str) -> [u8; 32] {
    Sha256::digest(passcode.as_bytes()).into()
}

fn mint_challenge(sfn: &str, template: &str, client_ip: u32, passcode: Option<String>) -> Result<()> {
    let cipher = match &passcode {
        Some(p) => NutCipher::from_passcode(p.as_bytes()),
        None => NutCipher::random(),
    };
    let nut_bytes = cipher.mint(client_ip, now_micros()?);
    let url = reply::substitute_template(template, sfn, &nut_bytes);
    info!(nut = hex::encode(nut_bytes), "minted challenge");
    println!("{url}");
    Ok(())
}

fn build_reply(nut_hex: &str, tif_hex: &str, qry: &str, passcode: &str) -> Result<()> {
    let nut = hex::decode(nut_hex).map_err(|e| anyhow!("invalid --nut-hex: {e}"))?;
    let tif = u16::from_str_radix(tif_hex, 16).map_err(|e| anyhow!("invalid --tif: {e}"))?;
    let builder = ReplyBuilder { nut, tif, qry: qry.to_string(), suk: None, ask: None, url: None };
    let body = builder.build(&mac_key(passcode));
    println!("{body}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::MintChallenge { sfn, template, client_ip, passcode } => mint_challenge(&sfn, &template, client_ip, passcode),
        Commands::BuildReply { nut_hex, tif, qry, passcode } => build_reply(&nut_hex, &tif, &qry, &passcode),
    }
}
