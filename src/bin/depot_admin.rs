//!
//! Depot admin binary
//! ------------------
//! One-shot maintenance commands against a repository data directory: seed a
//! small demo tree, inspect resources, rebuild the search index and run
//! prefix searches. Everything runs as the system principal.

use std::env;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use depot::query::{Query, Search};
use depot::resource::{PropName, PropertySet, Value};
use depot::types::PROP_TITLE;
use depot::{Principal, Repository, RepositoryConfig, Uri};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--data-dir <dir>] seed\n  {program} [--data-dir <dir>] show <uri>\n  {program} [--data-dir <dir>] ls <uri>\n  {program} [--data-dir <dir>] search [<uri prefix>]\n  {program} [--data-dir <dir>] rebuild\n\nCommands:\n  seed      create a small demo tree and save a snapshot\n  show      print one resource as JSON\n  ls        list the children of a collection\n  search    rebuild the index and search below a URI prefix\n  rebuild   re-scan the store into the search index\n\nDefaults:\n  --data-dir defaults to depot_data relative to the current working directory."
    );
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut data_dir = "depot_data".to_string();
    let mut rest: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" => {
                if i + 1 >= args.len() {
                    eprintln!("--data-dir requires a value");
                    print_usage(&program);
                    std::process::exit(2);
                }
                data_dir = args[i + 1].clone();
                i += 2;
                continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                rest.push(other.to_string());
                i += 1;
            }
        }
    }

    let Some(command) = rest.first().cloned() else {
        print_usage(&program);
        std::process::exit(2);
    };

    let config = RepositoryConfig::load_or_default(data_dir.as_str());
    let repo = Repository::open(config);
    let system = Principal::system();

    match command.as_str() {
        "seed" => {
            if repo.store().resource_count() > 1 {
                bail!("data directory '{data_dir}' already holds resources");
            }
            seed(&repo, &system)?;
            repo.save_snapshot()?;
            println!("seeded {} resources under {data_dir}", repo.store().resource_count());
        }
        "show" => {
            let uri = uri_arg(&rest, &program)?;
            let resource = repo.retrieve(Some(&system), &uri)?;
            println!("{}", serde_json::to_string_pretty(&resource)?);
        }
        "ls" => {
            let uri = uri_arg(&rest, &program)?;
            for child in repo.children(Some(&system), &uri)? {
                println!("{:>6}  {:<16}  {}", child.id, child.resource_type, child.uri);
            }
        }
        "search" => {
            let prefix = rest.get(1).cloned().unwrap_or_else(|| "/".to_string());
            let indexed = repo.rebuild_index(None)?;
            let search = Search::new(Query::UriPrefix { uri: prefix, inverted: false });
            let results = repo.search(Some(&system), &search)?;
            for hit in &results.hits {
                println!("{}", hit.uri);
            }
            eprintln!("{} hit(s) over {indexed} indexed resource(s)", results.hits.len());
        }
        "rebuild" => {
            let indexed = repo.rebuild_index(None)?;
            println!("indexed {indexed} resources");
        }
        unk => {
            eprintln!("Unrecognized command: {unk}");
            print_usage(&program);
            std::process::exit(2);
        }
    }
    Ok(())
}

fn uri_arg(rest: &[String], program: &str) -> Result<Uri> {
    let Some(raw) = rest.get(1) else {
        print_usage(program);
        std::process::exit(2);
    };
    Uri::parse(raw).with_context(|| format!("invalid uri '{raw}'"))
}

fn seed(repo: &Repository, system: &Principal) -> Result<()> {
    let no_props = PropertySet::new();
    repo.create_collection(system, &Uri::parse("/docs")?, &no_props)?;
    repo.create_document(
        system,
        &Uri::parse("/docs/readme.txt")?,
        b"Welcome to the depot demo tree.\n",
        None,
        &titled("Read me first"),
    )?;
    repo.create_collection(system, &Uri::parse("/docs/guides")?, &no_props)?;
    repo.create_document(
        system,
        &Uri::parse("/docs/guides/intro.txt")?,
        b"Resources live in a tree and inherit their ACL from above.\n",
        None,
        &titled("Introduction"),
    )?;
    repo.create_document(
        system,
        &Uri::parse("/docs/guides/layout.json")?,
        br#"{"sections":["acl","types","query","index"]}"#,
        Some("application/json"),
        &no_props,
    )?;
    repo.create_collection(system, &Uri::parse("/assets")?, &no_props)?;
    repo.create_document(
        system,
        &Uri::parse("/assets/logo.png")?,
        &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a],
        None,
        &no_props,
    )?;
    Ok(())
}

fn titled(title: &str) -> PropertySet {
    let mut props = PropertySet::new();
    props.set(PropName::default_ns(PROP_TITLE), Value::String(title.to_string()));
    props
}
