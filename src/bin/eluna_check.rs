use std::sync::Arc;

use anyhow::{Context, Result};
use eluna::config::ElunaConfig;
use eluna::host::NullHost;
use eluna::loader::ElunaLoader;
use eluna::mgr::ElunaMgr;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/eluna.yaml".to_string();
    let mut scripts: Option<String> = None;
    let mut boot = false;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: eluna_check [--conf FILE] [--scripts DIR] [--boot]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            "--scripts" => {
                if i + 1 < args.len() {
                    i += 1;
                    scripts = Some(args[i].clone());
                } else {
                    eprintln!("Error: --scripts requires a DIR argument");
                    return Ok(());
                }
            }
            "--boot" => boot = true,
            _ => {}
        }
        i += 1;
    }

    let mut config = if std::path::Path::new(&conf_file).exists() {
        ElunaConfig::from_file(&conf_file).with_context(|| format!("Cannot load config: {}", conf_file))?
    } else if scripts.is_some() {
        ElunaConfig::default()
    } else {
        anyhow::bail!("Cannot read config: {}", conf_file);
    };
    if let Some(dir) = scripts {
        config.script_path = dir;
    }

    let loader = ElunaLoader::new(Arc::new(config.clone()));
    let report = loader.load_scripts().context("Cannot load scripts")?;
    for (path, message) in &report.failures {
        eprintln!("{}: {}", path.display(), message);
    }
    println!(
        "{} script(s) compiled, {} failed, {} ms",
        report.loaded,
        report.failures.len(),
        report.elapsed.as_millis()
    );

    if boot {
        let mgr = ElunaMgr::new(config, Arc::new(NullHost)).context("Cannot start scripting")?;
        if let Some(world) = mgr.world() {
            world.on_startup();
            println!("world state booted with {} binding(s)", world.bindings().total());
        }
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
