use colored::Colorize;
use std::process;

use flu_submission::config::InputConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!(
        "{} {}",
        "Flu-Submission: influenza segment validation and GenBank submission packaging.\n Version:"
            .cyan()
            .bold(),
        env!("CARGO_PKG_VERSION").cyan().bold()
    );
    let config = InputConfig::build().unwrap_or_else(|err| {
        println!(
            "Problem parsing arguments: {}",
            err.to_string().red().bold()
        );
        process::exit(1);
    });
    println!("✅ Configurations validated, starting submission run...");
    #[cfg(debug_assertions)]
    dbg!(&config);
    if let Err(e) = flu_submission::run(config) {
        println!("Application error: {}", format!("{:#}", e).red().bold());
        process::exit(1);
    }
}
