//! Minimal signer for x402 canonical messages.
//!
//! Reconstructs nothing: the `sign` command expects the exact message text
//! the server will rebuild, hashes it with the EIP-191 prefix, and prints a
//! 65-byte `{r, s, v}` signature with `v` in {27, 28}.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use splendor_crypto::ecdsa;

#[derive(Parser)]
#[command(name = "x402sign")]
#[command(about = "Sign x402 canonical payment messages")]
struct Args {
    /// Hex private key (with or without 0x)
    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the address for the private key
    Addr,
    /// Sign a canonical message string, e.g.
    /// "x402-payment:{from}:{to}:{value}:{validAfter}:{validBefore}:{nonce}:{chainId}"
    Sign { message: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let secret = load_secret(&args.key)?;

    match args.command {
        Command::Addr => {
            let address = ecdsa::address_of(&secret).context("invalid private key")?;
            println!("{address}");
        }
        Command::Sign { message } => {
            let hash = ecdsa::eip191_hash(message.as_bytes());
            let signature = ecdsa::sign_prehash(&secret, &hash).context("signing failed")?;
            println!("0x{}", hex::encode(signature));
        }
    }
    Ok(())
}

fn load_secret(hex_key: &str) -> Result<[u8; 32]> {
    let trimmed = hex_key.trim().trim_start_matches("0x");
    let bytes = hex::decode(trimmed).context("key is not hex")?;
    if bytes.len() != 32 {
        bail!("want 32-byte private key, got {}", bytes.len());
    }
    Ok(<[u8; 32]>::try_from(bytes.as_slice()).expect("length checked"))
}
