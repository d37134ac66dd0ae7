//! AQL 交互式演示：读入查询文本，编译成参数化 SQL 并在内置的
//! 内存示例库上执行。仅用于演示与手工调试，不属于核心库契约。

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use aql::config::EngineConfig;
use aql::exec::Executor;

fn load_config() -> EngineConfig {
    match EngineConfig::from_json_file("aql_engine.json") {
        Ok(config) => {
            println!("已从 aql_engine.json 加载引擎配置");
            config
        }
        Err(_) => EngineConfig::default(),
    }
}

/// 构建演示用的元数据库。
fn fixture_db() -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory().context("open in-memory database")?;
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, repo TEXT, path TEXT, name TEXT, size INTEGER, modified INTEGER);
         CREATE TABLE stats (item_id INTEGER, downloads INTEGER, last_downloaded INTEGER);
         CREATE TABLE props (item_id INTEGER, prop_key TEXT, prop_value TEXT);
         CREATE TABLE archive_entries (item_id INTEGER, entry_name TEXT, entry_path TEXT);
         INSERT INTO items VALUES (1, 'libs-release', 'org/demo', 'lib-core-1.0.jar', 1024, 1700000000000);
         INSERT INTO items VALUES (2, 'libs-release', 'org/demo', 'lib-util-1.0.jar', 2048, 1700000100000);
         INSERT INTO items VALUES (3, 'libs-snapshot', 'org/demo', 'app-2.0.jar', 4096, 1700000200000);
         INSERT INTO stats VALUES (1, 42, 1700000300000);
         INSERT INTO props VALUES (1, 'build.number', '17');
         INSERT INTO props VALUES (3, 'build.number', '18');
         INSERT INTO archive_entries VALUES (1, 'MANIFEST.MF', 'META-INF');",
    )
    .context("create fixture schema")?;
    Ok(conn)
}

fn run_query(conn: &rusqlite::Connection, config: &EngineConfig, line: &str) {
    let compiled = match aql::compile_text(line, config) {
        Ok(compiled) => compiled,
        Err(e) => {
            println!("✗ 编译失败（{} 阶段）: {}", e.stage(), e);
            return;
        }
    };

    println!("[SQL] {}", compiled.sql);
    if !compiled.params.0.is_empty() {
        println!("[绑定参数] {:?}", compiled.params.0);
    }

    match Executor::new(conn).execute_eager(&compiled) {
        Ok(result) => {
            println!("[结果] {} 行", result.count());
            for row in &result.rows {
                match serde_json::to_string(row) {
                    Ok(json) => println!("  {}", json),
                    Err(e) => println!("  <无法序列化: {}>", e),
                }
            }
        }
        Err(e) => println!("✗ 执行失败（{} 阶段）: {}", e.stage(), e),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("--- AQL → SQL 编译器演示 ---");
    println!(r#"示例: items.find({{"repo":"libs-release"}}).sort({{"$desc":["modified"]}}).limit(10)"#);
    println!("输入 exit 退出\n");

    let config = load_config();
    let conn = fixture_db()?;
    let mut editor = DefaultEditor::new().context("initialize line editor")?;

    loop {
        match editor.readline("aql> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                let _ = editor.add_history_entry(line);
                run_query(&conn, &config, line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("read input line"),
        }
    }
    Ok(())
}
