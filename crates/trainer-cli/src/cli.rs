use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use trainer_core::OffsetChain;

#[derive(Parser)]
#[command(name = "trainer")]
#[command(about = "Attach to a running game and poke at its memory")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true, default_value = "trainer.json")]
    pub config: PathBuf,

    /// Target executable name, overriding the configuration
    #[arg(short, long, global = true, env = "TRAINER_PROCESS")]
    pub process: Option<String>,

    /// Seconds to wait for the target to become live
    #[arg(long, global = true, default_value_t = 30)]
    pub wait: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Follow the target's lifecycle until Ctrl+C
    Watch {
        /// Bring the game window to the foreground once attached
        #[arg(long)]
        focus: bool,
    },
    /// Read values through an offset chain
    Read {
        #[command(flatten)]
        target: ChainArgs,

        #[arg(short = 't', long = "type", value_enum, default_value = "i32")]
        value_type: ValueType,

        /// Number of consecutive values (ignored for strings)
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Write a value through an offset chain
    Write {
        #[command(flatten)]
        target: ChainArgs,

        #[arg(short = 't', long = "type", value_enum, default_value = "i32")]
        value_type: ValueType,

        #[arg(short, long, allow_hyphen_values = true)]
        value: String,
    },
    /// Run a signature file against the target and print resolved offsets
    Scan {
        #[arg(short, long)]
        signatures: PathBuf,

        /// Print resolved offsets as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a function inside the target
    Call {
        /// Function address (hex)
        #[arg(short, long)]
        address: String,

        /// Treat the address as relative to the image base
        #[arg(long)]
        relative: bool,

        /// Integer arguments, in register order
        #[arg(long = "int", allow_hyphen_values = true, conflicts_with = "string")]
        ints: Vec<String>,

        /// Float arguments, in register order
        #[arg(long = "float", allow_hyphen_values = true, conflicts_with = "string")]
        floats: Vec<f32>,

        /// Pass a single string argument instead
        #[arg(long)]
        string: Option<String>,
    },
    /// Turn a captured call stack back into absolute addresses
    Symbolize {
        /// Space-separated image-relative frames
        stack: String,

        /// Image base to apply (hex)
        #[arg(short, long)]
        base: Option<String>,
    },
}

#[derive(clap::Args)]
pub struct ChainArgs {
    /// Offset chain, e.g. "0x5B28C0,0x18,0x2B4"
    #[arg(long, allow_hyphen_values = true)]
    pub chain: OffsetChain,

    /// The first offset is an absolute address rather than image-relative
    #[arg(long)]
    pub absolute: bool,
}

impl ChainArgs {
    pub fn resolve(&self) -> OffsetChain {
        if self.absolute && !self.chain.is_absolute() {
            OffsetChain::absolute(self.chain.offsets())
        } else {
            self.chain.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ValueType {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}
