use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("workerlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: workerlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("WORKERLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "frame_max_payload: {}",
        workerlink_wire::DEFAULT_MAX_PAYLOAD
    );
    println!(
        "default_operation: {}",
        workerlink_comm::DEFAULT_OPERATION
    );
    println!("features: comm={}, cli=true", cfg!(feature = "comm"));

    Ok(SUCCESS)
}
