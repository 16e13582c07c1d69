use anyhow::{bail, Result};
use env_logger::Env;

use pagestore::{AttrType, Attribute, IndexManager, PagedFileManager, RecordManager, Rid, RootPageCache, Value};

// Temporary driver program so I can exercise the library's top level APIs
// without wiring up a separate project.
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <command>"),
        2 => bail!("Missing <path>"),
        _ => {}
    }

    let command = &args[1];
    let path = &args[2];
    let mut pfm = PagedFileManager::new();

    match command.as_str() {
        "create" => {
            RecordManager::create_file(&mut pfm, path)?;
            println!("created {path}");
        }
        "destroy" => {
            RecordManager::destroy_file(&pfm, path)?;
            println!("destroyed {path}");
        }
        "pages" => {
            let rm = RecordManager::open_file(&mut pfm, path)?;
            println!("{path}: {} pages", rm.num_pages());
            rm.close(&mut pfm)?;
        }
        "rec-insert" => {
            if args.len() < 6 {
                bail!("Usage: rec-insert <path> <id:int> <score:real> <name:varchar>");
            }
            let id: i32 = args[3].parse()?;
            let score: f32 = args[4].parse()?;
            let name = args[5].clone();
            let mut rm = RecordManager::open_file(&mut pfm, path)?;
            let rid = rm.insert_record(&[Value::Int(id), Value::Real(score), Value::VarChar(name)])?;
            println!("inserted at {rid}");
            rm.close(&mut pfm)?;
        }
        "rec-scan" => {
            let descriptor = record_descriptor();
            let mut rm = RecordManager::open_file(&mut pfm, path)?;
            for row in rm.scan(&descriptor, None, None)? {
                let (rid, values) = row?;
                println!("{rid}: {values:?}");
            }
            rm.close(&mut pfm)?;
        }
        "ix-create" => {
            IndexManager::create_file(&mut pfm, path)?;
            println!("created index {path}");
        }
        "ix-insert" => {
            if args.len() < 6 {
                bail!("Usage: ix-insert <path> <key:int> <ref-page> <ref-slot>");
            }
            let key: i32 = args[3].parse()?;
            let ref_page: u32 = args[4].parse()?;
            let ref_slot: u32 = args[5].parse()?;
            let mut cache = RootPageCache::new();
            let mut im = IndexManager::open_file(&mut pfm, path, AttrType::Int, &mut cache)?;
            im.insert_entry(Value::Int(key), Rid::new(ref_page, ref_slot), &mut cache)?;
            println!("inserted key {key}");
            im.close(&mut pfm)?;
        }
        "ix-scan" => {
            let low = args.get(3).map(|s| s.parse::<i32>()).transpose()?.map(Value::Int);
            let high = args.get(4).map(|s| s.parse::<i32>()).transpose()?.map(Value::Int);
            let mut cache = RootPageCache::new();
            let mut im = IndexManager::open_file(&mut pfm, path, AttrType::Int, &mut cache)?;
            for entry in im.scan(low, high, true, true) {
                let (key, rid) = entry?;
                println!("{key:?} -> {rid}");
            }
            im.close(&mut pfm)?;
        }
        _ => bail!("Unknown command: {command}"),
    }

    Ok(())
}

fn record_descriptor() -> Vec<Attribute> {
    vec![
        Attribute {
            name: "id".into(),
            attr_type: AttrType::Int,
            length: 4,
        },
        Attribute {
            name: "score".into(),
            attr_type: AttrType::Real,
            length: 4,
        },
        Attribute {
            name: "name".into(),
            attr_type: AttrType::VarChar,
            length: 255,
        },
    ]
}
