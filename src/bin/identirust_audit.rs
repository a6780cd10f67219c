use anyhow::Context;
use identirust::audit::audit_store;
use identirust::config::DEFAULT_DATA_DIR;
use identirust::PersistentContactStore;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"identirust_audit - check a contact store against the linking invariants

USAGE:
    identirust_audit [OPTIONS]

OPTIONS:
    -d, --data-dir <DIR>    RocksDB data directory [default: ./identirust-data]
        --json              Print the report as JSON
    -h, --help              Print help

Exits with status 1 when any violation is found, and with an error when
the data directory holds no contact store.
"#
    );
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    let data_dir = parse_arg("--data-dir")
        .or_else(|| parse_arg("-d"))
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

    let store = PersistentContactStore::open_existing(&data_dir)
        .with_context(|| format!("cannot audit {data_dir}"))?;
    let report = audit_store(&store)?;

    if has_flag("--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Audited {data_dir}");
        println!("  contacts:   {}", report.contacts);
        println!("  primaries:  {}", report.primaries);
        println!("  violations: {}", report.violations.len());
        for violation in &report.violations {
            println!("    - {violation}");
        }
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
