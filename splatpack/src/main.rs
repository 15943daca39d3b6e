use clap::{ArgGroup, Parser};
use log::{error, info};
use splatpack_lib::common::ZSTD_MAX_COMPRESSION_LVL;
use splatpack_lib::{compress, compress_async, decompress, decompress_async};
use splatpack_lib::{DecodeOptions, EncodeOptions, ShBands};
use std::cmp::min;
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "Splat Packer",
    version = "0.1",
    about = "Packs Gaussian splat PLY files into chunked, quantized assets and back"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["compress", "decompress"])
))]
struct Cli {
    #[arg(short = 'e', long = "compress", help = "Enable compression mode.")]
    compress: bool,

    #[arg(short = 'd', long = "decompress", help = "Enable decompression mode.")]
    decompress: bool,

    #[arg(
        short = 'n',
        value_name = "INCLUDE_NORMALS",
        default_value = "false",
        long = "normals",
        help = "Include zero normals in the output PLY file (only valid with decompression)."
    )]
    include_normals: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required = true,
        help = "Path to the output file."
    )]
    output: String,

    #[arg(
        short = 'c',
        long = "compression-level",
        value_name = "LEVEL",
        default_value = "3",
        help = "Set the compression level."
    )]
    compression_level: u32,

    #[arg(
        short = 'w',
        long = "workers",
        value_name = "WORKERS",
        default_value = "3",
        help = "Set the workers count for ZSTD."
    )]
    workers: u32,

    #[arg(
        short = 'b',
        long = "sh-bands",
        value_name = "BANDS",
        value_parser = clap::value_parser!(u8).range(0..=3),
        help = "Keep at most this many spherical harmonics bands (0-3)."
    )]
    sh_bands: Option<u8>,

    #[arg(
        long = "no-color-bounds",
        default_value = "false",
        help = "Store colors as raw 8-bit values instead of per-chunk ranges (only valid with compression)."
    )]
    no_color_bounds: bool,

    #[arg(
        long = "no-morton-order",
        default_value = "false",
        help = "Keep the input splat order instead of sorting along a Morton curve (compression only)."
    )]
    no_morton_order: bool,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous compression/decompression mode."
    )]
    async_mode: bool,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.include_normals && !cli.decompress {
        error!("--normals (-n) can only be used with decompression (-d).");
        process::exit(1);
    }
    if (cli.no_color_bounds || cli.no_morton_order) && !cli.compress {
        error!("--no-color-bounds and --no-morton-order can only be used with compression (-e).");
        process::exit(1);
    }

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        error!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    let sh_bands = cli.sh_bands.and_then(ShBands::from_u8);
    let encode_options = EncodeOptions {
        sh_bands,
        color_bounds: !cli.no_color_bounds,
        morton_order: !cli.no_morton_order,
    };
    let decode_options = DecodeOptions { sh_bands };

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    let op = if cli.compress {
        "Compression"
    } else {
        "Decompression"
    };

    info!("Mode: {} {}", mode, op);
    info!("Input: {} | Output: {}", cli.input, cli.output);
    if cli.compress {
        info!("Level: {}", cli.compression_level);
    } else {
        info!(
            "{} normals in output",
            if cli.include_normals {
                "Including"
            } else {
                "Excluding"
            }
        );
    }
    if let Some(bands) = sh_bands {
        info!("SH bands capped at {}", bands.as_u8());
    }

    let cmp_level = min(cli.compression_level, ZSTD_MAX_COMPRESSION_LVL);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();

    let result: Vec<u8> = if cli.async_mode {
        rt.block_on(async {
            let mut buf = Vec::new();
            if cli.compress {
                compress_async(&raw_data, cmp_level, cli.workers, &encode_options, &mut buf)
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
            } else {
                decompress_async(&raw_data, cli.include_normals, &decode_options, &mut buf)
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
            }
            Ok::<Vec<u8>, Box<dyn Error + Send + Sync>>(buf)
        })?
    } else {
        let mut buf = Vec::new();
        if cli.compress {
            compress(&raw_data, cmp_level, cli.workers, &encode_options, &mut buf)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        } else {
            decompress(&raw_data, cli.include_normals, &decode_options, &mut buf)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        }
        buf
    };

    info!("{} Time: {} ms", op, start.elapsed().as_millis());

    fs::write(&cli.output, &result).unwrap_or_else(|e| {
        error!("Error writing output '{}': {}", cli.output, e);
        process::exit(1);
    });
    info!(
        "Successfully wrote {} bytes to '{}'.",
        result.len(),
        cli.output
    );

    Ok(())
}
