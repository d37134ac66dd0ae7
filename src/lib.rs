//! AQL：面向制品仓库元数据的查询语言编译与执行管线。
//!
//! 完整流程：
//!
//! ```text
//! 文本 → 解析引擎（语法树）→ token 流 → 模型构建 → AqlQuery
//!      → 装饰器 → 连接图解析 → SQL 生成 → 参数化 SQL → 执行引擎 → 类型化行
//! ```
//!
//! ```no_run
//! use aql::{compile_text, config::EngineConfig, exec::Executor};
//!
//! # fn run(conn: &rusqlite::Connection) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let compiled = compile_text(
//!     r#"items.find({"repo":"libs-release"}).sort({"$desc":["modified"]}).limit(10)"#,
//!     &config,
//! )?;
//! let result = Executor::new(conn).execute_eager(&compiled)?;
//! println!("{} rows", result.count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decorate;
pub mod error;
pub mod exec;
pub mod grammar;
pub mod model;
pub mod parse;
pub mod schema;
pub mod sqlgen;

pub use error::{AqlError, Result, Stage};
pub use exec::{AqlRow, EagerResult, Executor};
pub use model::{AqlDomain, AqlQuery, AqlQueryBuilder, Criteria};
pub use sqlgen::CompiledQuery;

/// 解析 AQL 文本，产出未装饰的查询模型。
pub fn parse_text(text: &str) -> Result<AqlQuery> {
    let tokens = parse::parse(grammar::Grammar::shared(), text)?;
    tracing::debug!(tokens = tokens.len(), "parsed query text");
    model::build_query(&tokens)
}

/// 装饰并编译一个查询模型（parser 与 builder 两条路径在这里汇合）。
pub fn compile(query: AqlQuery, config: &config::EngineConfig) -> Result<CompiledQuery> {
    let decorated = decorate::decorate(query, config);
    sqlgen::generate(&decorated)
}

/// 文本一步到编译结果。
pub fn compile_text(text: &str, config: &config::EngineConfig) -> Result<CompiledQuery> {
    compile(parse_text(text)?, config)
}
