use taskflow_lib::cli::UsageError;

#[tokio::main]
async fn main() {
    let data_dir = taskflow_lib::config::data_dir();
    let logger = match taskflow_lib::logging::init_logging(&data_dir) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("taskflow: failed to initialize logging: {err}");
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let status = match taskflow_lib::run(&data_dir, &args).await {
        Ok(()) => 0,
        Err(err) => {
            log::error!("taskflow: fatal error={err}");
            eprintln!("taskflow: {err}");
            if err.is::<UsageError>() {
                2
            } else {
                1
            }
        }
    };

    // `exit` skips destructors, so flush the buffered file writer first.
    logger.flush();
    drop(logger);
    if status != 0 {
        std::process::exit(status);
    }
}
