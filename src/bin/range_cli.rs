//! Line-oriented CLI for exercising the range engine.
//!
//! Reads one command per line from stdin and prints results to stdout.
//! A bound written as `-` is unbounded.
//!
//! Usage:
//!   range_cli [max_leaf_keys] [max_interior_keys]
//!
//! Commands:
//!   put <key> <value>
//!   get <key>
//!   delete <key>
//!   rank <key>
//!   at <rank>
//!   count <from> <to>
//!   range <from> <to> [capacity] [flags] [prefix]
//!   bulk_insert <count>
//!   debug <key>
//!   stats | tree | check | clear | help | quit

use btree_range::{BTreeConfig, Config, FnFilter, Index, RangeFlags, Result};
use std::env;
use std::io::{self, BufRead, Write};
use std::process::exit;

fn print_help() {
    println!("Commands:");
    println!("  put <key> <value>                       - Insert or update a key-value pair");
    println!("  get <key>                               - Get value for a key");
    println!("  delete <key>                            - Delete a key");
    println!("  rank <key>                              - Rank of a key (negative if absent)");
    println!("  at <rank>                               - Entry at a rank");
    println!("  count <from> <to>                       - Number of keys in [from, to)");
    println!("  range <from> <to> [cap] [flags] [pfx]   - Walk [from, to); flags like keys,vals,delete");
    println!("  bulk_insert <count>                     - Insert count test records");
    println!("  debug <key>                             - Trace a lookup");
    println!("  stats                                   - Show index statistics");
    println!("  tree                                    - Dump the tree as JSON");
    println!("  check                                   - Validate the tree structure");
    println!("  clear                                   - Remove every entry");
    println!("  quit                                    - Exit");
}

fn bound(arg: Option<&str>) -> Option<&[u8]> {
    match arg {
        None | Some("-") => None,
        Some(s) => Some(s.as_bytes()),
    }
}

fn parse_flags(arg: &str) -> Option<RangeFlags> {
    let mut flags = RangeFlags::NONE;
    for name in arg.split(',').filter(|s| !s.is_empty()) {
        flags |= match name {
            "keys" => RangeFlags::KEYS,
            "vals" => RangeFlags::VALS,
            "delete" => RangeFlags::DELETE,
            "all" => RangeFlags::ALL,
            raw => RangeFlags::from_bits_retain(raw.parse().ok()?),
        };
    }
    Some(flags)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

fn run_range(index: &Index, args: &[&str]) -> Result<()> {
    let from = bound(args.first().copied());
    let to = bound(args.get(1).copied());
    let capacity = match args.get(2).map(|s| s.parse::<i32>()) {
        None => 0,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            println!("ERROR: Invalid capacity");
            return Ok(());
        }
    };
    let flags = match args.get(3).map(|s| parse_flags(s)) {
        None => RangeFlags::KEYS | RangeFlags::VALS,
        Some(Some(flags)) => flags,
        Some(None) => {
            println!("ERROR: Invalid flags");
            return Ok(());
        }
    };
    let filter = args.get(4).map(|prefix| {
        let prefix = prefix.as_bytes().to_vec();
        FnFilter::new()
            .with_accept(move |key, _| key.starts_with(&prefix))
            .boxed()
    });

    let mut cursor = index.range_iterator_with(from, to, capacity, flags, filter)?;
    let mut count = 0u64;
    while cursor.has_next()? {
        let entry = cursor.next()?;
        count += 1;
        match (entry.key(), entry.value()) {
            (Some(k), Some(v)) => println!("{} -> {}", lossy(k), lossy(v)),
            (Some(k), None) => println!("{}", lossy(k)),
            (None, Some(v)) => println!("-> {}", lossy(v)),
            (None, None) => {}
        }
    }
    println!("COUNT: {}", count);
    println!("REFILLS: {}", cursor.refills());
    if flags.deletes() {
        println!("DELETED: {}", cursor.deleted());
    }
    Ok(())
}

/// Execute one command; returns false on quit
fn execute(index: &Index, line: &str) -> Result<bool> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = parts.split_first() else {
        return Ok(true);
    };

    match (command, args) {
        ("put", [key, value]) => match index.put(key.as_bytes(), value.as_bytes())? {
            Some(_) => println!("UPDATED"),
            None => println!("OK"),
        },

        ("get", [key]) => match index.get(key.as_bytes())? {
            Some(value) => match String::from_utf8(value) {
                Ok(s) => println!("{}", s),
                Err(_) => println!("<binary data>"),
            },
            None => println!("NOT_FOUND"),
        },

        ("delete", [key]) => match index.delete(key.as_bytes())? {
            Some(_) => println!("DELETED"),
            None => println!("NOT_FOUND"),
        },

        ("rank", [key]) => println!("{}", index.index_of(key.as_bytes())?),

        ("at", [rank]) => match rank.parse::<u64>() {
            Ok(rank) => match (index.key_at(rank)?, index.value_at(rank)?) {
                (Some(k), Some(v)) => println!("{} -> {}", lossy(&k), lossy(&v)),
                _ => println!("NOT_FOUND"),
            },
            Err(_) => println!("ERROR: Invalid rank"),
        },

        ("count", [from, to]) => {
            println!("{}", index.range_count(bound(Some(*from)), bound(Some(*to)))?);
        }

        ("range", args) if args.len() <= 5 => run_range(index, args)?,

        ("bulk_insert", [count]) => {
            let Ok(count) = count.parse::<usize>() else {
                println!("ERROR: Invalid count");
                return Ok(true);
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let key = format!("key_{:08}", i);
                let value = format!("value_{}", i);
                index.put(key.as_bytes(), value.as_bytes())?;
            }
            let elapsed = start.elapsed();

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {:.0}", ops_per_sec);
        }

        ("debug", [key]) => {
            for line in index.debug_get(key.as_bytes())? {
                println!("{}", line);
            }
        }

        ("stats", []) => {
            let stats = index.stats();
            println!("entries: {}", stats.len);
            println!("tree_height: {}", stats.height);
            println!("node_count: {}", stats.node_count);
            println!("max_leaf_keys: {}", stats.btree_config.max_leaf_keys);
            println!("max_interior_keys: {}", stats.btree_config.max_interior_keys);
            println!("default_capacity: {}", stats.btree_config.default_capacity);
        }

        ("tree", []) => match serde_json::to_string_pretty(&index.export_tree()?) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("ERROR: {}", e),
        },

        ("check", []) => {
            index.check_invariants()?;
            println!("OK");
        }

        ("clear", []) => {
            index.clear();
            println!("OK");
        }

        ("help", _) => print_help(),

        ("quit", _) | ("exit", _) => return Ok(false),

        _ => println!("Unknown command or wrong arguments: {} (try help)", line.trim()),
    }

    Ok(true)
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut btree_config = BTreeConfig::default();
    if args.len() > 1 {
        let limits: Vec<usize> = match args[1..].iter().map(|s| s.parse()).collect() {
            Ok(limits) => limits,
            Err(_) => {
                eprintln!("Usage: range_cli [max_leaf_keys] [max_interior_keys]");
                exit(1);
            }
        };
        let leaf = limits[0];
        let interior = limits.get(1).copied().unwrap_or(btree_config.max_interior_keys);
        btree_config = BTreeConfig::new(leaf, interior);
    }

    let index = Index::open(Config::new().btree_config(btree_config));
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("ERROR: Failed to read input: {}", e);
                exit(1);
            }
        }

        match execute(&index, &line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_fatal() => {
                eprintln!("FATAL: {}", e);
                exit(2);
            }
            Err(e) => println!("ERROR: {}", e),
        }
    }
}
