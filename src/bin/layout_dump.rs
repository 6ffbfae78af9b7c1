//! Decode a binary file with a layout script and print the field tree.
//!
//! Usage:
//!   layout_dump [OPTIONS] SCRIPT [DATA]
//!
//! Reads DATA (or stdin when omitted), decodes it with the compiled SCRIPT and
//! prints the tree. Set RUST_LOG=debug (or trace) for pass details.
//!
//! Options:
//!   --msb0, -m         Bit order MSB0 (default LSB0)
//!   --little, -l       Default byte order little endian (default big)
//!   --ext NAME=VALUE   External value, may repeat
//!   --skip-eof         Stop quietly when data ends at a field boundary
//!   --roundtrip, -r    Re-encode the tree and check it reproduces the input

use binlayout::dump::dump;
use binlayout::{compile_with, BitOrder, Codec, CodecOptions, CompileOptions, Endianness};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;

fn take_flag(args: &mut Vec<String>, long: &str, short: Option<&str>) -> bool {
    match args.iter().position(|a| a == long || Some(a.as_str()) == short) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_externals(args: &mut Vec<String>) -> anyhow::Result<HashMap<String, i64>> {
    let mut out = HashMap::new();
    while let Some(pos) = args.iter().position(|a| a == "--ext") {
        args.remove(pos);
        if pos >= args.len() {
            anyhow::bail!("--ext needs NAME=VALUE");
        }
        let pair = args.remove(pos);
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--ext expects NAME=VALUE, got '{}'", pair))?;
        out.insert(name.trim().to_string(), value.trim().parse()?);
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let msb0 = take_flag(&mut args, "--msb0", Some("-m"));
    let little = take_flag(&mut args, "--little", Some("-l"));
    let skip_eof = take_flag(&mut args, "--skip-eof", None);
    let roundtrip = take_flag(&mut args, "--roundtrip", Some("-r"));
    let externals = take_externals(&mut args)?;

    let (script_path, data_path) = match args.as_slice() {
        [script] => (script.clone(), None),
        [script, data] => (script.clone(), Some(data.clone())),
        _ => anyhow::bail!("usage: layout_dump [--msb0] [--little] [--ext NAME=VALUE] [--skip-eof] [--roundtrip] SCRIPT [DATA]"),
    };

    let src = std::fs::read_to_string(&script_path)?;
    let compile_options = CompileOptions::default().with_byte_order(if little {
        Endianness::Little
    } else {
        Endianness::Big
    });
    let block = compile_with(&src, &compile_options).map_err(|e| anyhow::anyhow!("{}: {}", script_path, e))?;

    let codec_options = CodecOptions::default()
        .with_bit_order(if msb0 { BitOrder::Msb0 } else { BitOrder::Lsb0 })
        .skip_remaining_fields_if_eof(skip_eof);
    let codec = Codec::with_options(block, codec_options);

    let data = match &data_path {
        Some(p) => std::fs::read(Path::new(p))?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let (tree, consumed) = codec.decode_with_extent(&data, Some(&externals))?;
    println!("{}", dump(&tree));
    eprintln!("script: {}", script_path);
    eprintln!("data:   {}", data_path.as_deref().unwrap_or("<stdin>"));
    eprintln!("bytes consumed: {} of {}", consumed, data.len());

    if roundtrip {
        let encoded = codec.encode_with(&tree, Some(&externals))?;
        if encoded != data[..consumed] {
            eprintln!("roundtrip: MISMATCH ({} bytes re-encoded)", encoded.len());
            std::process::exit(1);
        }
        eprintln!("roundtrip: ok");
    }
    Ok(())
}
