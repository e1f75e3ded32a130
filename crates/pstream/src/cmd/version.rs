use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("pstream {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("PSTREAM_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("byte_order: {}", byte_order());
    println!("max_frame_size: {}", pstream_frame::MAX_FRAME_SIZE);
    println!("transports: {}", transports().join(", "));

    Ok(SUCCESS)
}

fn byte_order() -> &'static str {
    if cfg!(target_endian = "big") {
        "big-endian"
    } else {
        "little-endian"
    }
}

fn transports() -> Vec<&'static str> {
    let mut names = vec!["memory"];
    if cfg!(unix) {
        names.insert(0, "unix");
    }
    names
}
