use std::fs;
use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use sqrl_core::crypto::{EnScrypt, EnScryptMode};
use sqrl_core::storage::Storage;

#[derive(Parser)]
#[command(name = "sqrl-cli")]
#[command(about = "Reference command-line tools for SQRL identity operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stretch a password with EnScrypt and print the 32-byte result as hex
    #[command(name = "enscrypt")]
    Enscrypt {
        /// Suppress interactive prompts for missing arguments
        #[arg(short = 'q', long)]
        quiet: bool,
        /// Password to stretch; prompted for if omitted
        password: Option<String>,
        /// Salt as hex; prompted for if omitted
        salt_hex: Option<String>,
        /// Either `<n>i` (run exactly n iterations) or `<n>s` (run for n seconds)
        cost: Option<String>,
    },

    /// Dump the cleartext fields of an S4 identity container
    #[command(name = "sqrl_peek")]
    SqrlPeek {
        /// The identity's password
        password: String,
        /// The identity's rescue code, if the type-2 block should be opened too
        rescue_code: Option<String>,
        /// SQRLDATA text, or a path to a file holding one of the three storage forms
        input: String,
    },
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_cost(token: &str, n_factor: u8) -> Result<EnScryptMode> {
    let (digits, suffix) = token.split_at(token.len().saturating_sub(1));
    let n: u32 = digits.parse().map_err(|_| anyhow!("cost must be `<n>i` or `<n>s`"))?;
    match suffix {
        "i" => Ok(EnScryptMode::Iterations(n)),
        "s" => {
            let _ = n_factor;
            Ok(EnScryptMode::Millis(n * 1000))
        }
        _ => bail!("cost must end in `i` (iterations) or `s` (seconds)"),
    }
}

fn run_enscrypt(quiet: bool, password: Option<String>, salt_hex: Option<String>, cost: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None if quiet => bail!("password is required in quiet mode"),
        None => prompt_line("password")?,
    };
    let salt_hex = match salt_hex {
        Some(s) => s,
        None if quiet => bail!("salt is required in quiet mode"),
        None => prompt_line("salt (hex)")?,
    };
    let salt = hex::decode(salt_hex.trim()).map_err(|e| anyhow!("salt is not valid hex: {e}"))?;
    let cost = cost.unwrap_or_else(|| "5s".to_string());
    let n_factor = 9;
    let mode = parse_cost(&cost, n_factor)?;

    let (result, _iterations) = EnScrypt::new(password.as_bytes(), &salt, n_factor, mode).run_to_completion()?;
    println!("{}", hex::encode(result));
    Ok(())
}

fn load_storage(input: &str) -> Result<Storage> {
    if input.starts_with("SQRLDATA") || input.starts_with("sqrldata") {
        Storage::load(input.as_bytes()).map_err(|e| anyhow!("failed to parse identity: {e}"))
    } else {
        let bytes = fs::read(input).map_err(|e| anyhow!("failed to read {input}: {e}"))?;
        Storage::load(&bytes).map_err(|e| anyhow!("failed to parse identity: {e}"))
    }
}

fn run_sqrl_peek(password: &str, rescue_code: Option<String>, input: &str) -> Result<()> {
    let storage = load_storage(input)?;
    println!("hasBlock(1) password = {}", storage.has_block(1));
    println!("hasBlock(2) rescue   = {}", storage.has_block(2));
    println!("hasBlock(3) previous = {}", storage.has_block(3));

    let mut mk = None;
    if let Some(type1) = &storage.type1 {
        let (key, _) = EnScrypt::new(password.as_bytes(), &type1.salt, type1.n_factor, EnScryptMode::Iterations(type1.iter_count)).run_to_completion()?;
        let (block_mk, block_ilk) = type1.open(&key)?;
        println!("type1.n_factor = {}", type1.n_factor);
        println!("type1.iter_count = {}", type1.iter_count);
        println!("type1.hint_len = {}", type1.hint_len);
        println!("type1.enscrypt_seconds = {}", type1.enscrypt_seconds);
        println!("type1.timeout_minutes = {}", type1.timeout_minutes);
        println!("type1.mk = {}", hex::encode(block_mk));
        println!("type1.ilk = {}", hex::encode(block_ilk));
        mk = Some(block_mk);
    }

    if let (Some(type2), Some(rescue_code)) = (&storage.type2, rescue_code) {
        let (key, _) =
            EnScrypt::new(rescue_code.as_bytes(), &type2.salt, type2.n_factor, EnScryptMode::Iterations(type2.iter_count)).run_to_completion()?;
        let iuk = type2.open(&key)?;
        println!("type2.n_factor = {}", type2.n_factor);
        println!("type2.iter_count = {}", type2.iter_count);
        println!("type2.iuk = {}", hex::encode(iuk));
    }

    if let (Some(type3), Some(mk)) = (&storage.type3, mk) {
        let previous = type3.open(&mk)?;
        for (i, piuk) in previous.iter().enumerate() {
            if piuk.iter().all(|&b| b == 0) {
                continue;
            }
            println!("type3.previous[{i}] = {}", hex::encode(piuk));
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Enscrypt { quiet, password, salt_hex, cost } => run_enscrypt(quiet, password, salt_hex, cost),
        Commands::SqrlPeek { password, rescue_code, input } => run_sqrl_peek(&password, rescue_code, &input),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
