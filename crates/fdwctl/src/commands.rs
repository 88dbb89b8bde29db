use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use sqlite_fdw::estimate::{estimate_rows, foreign_path_cost};
use sqlite_fdw::explain::explain_scan;
use sqlite_fdw::import::{ImportList, ImportSchemaStmt, import_foreign_schema, translate_type};
use sqlite_fdw::options::{ImportOptions, OptionContext, validate_options};
use tracing::debug;

#[derive(Subcommand)]
pub enum Commands {
    /// Print CREATE FOREIGN TABLE statements for the tables of a database.
    ImportSchema(ImportSchemaArgs),
    /// Show the host type a sqlite declared type imports as.
    TranslateType(TranslateTypeArgs),
    /// Show sqlite's row estimate and the resulting path cost for a query.
    Estimate(QueryArgs),
    /// Show the EXPLAIN properties of a remote query.
    Explain(ExplainArgs),
}

impl Commands {
    pub fn run(self, out: &mut dyn Write) -> Result<()> {
        match self {
            Commands::ImportSchema(args) => args.run(out),
            Commands::TranslateType(args) => args.run(out),
            Commands::Estimate(args) => args.run(out),
            Commands::Explain(args) => args.run(out),
        }
    }
}

trait RunCommand {
    fn run(self, out: &mut dyn Write) -> Result<()>;
}

/// Checks the path the same way the server `database` option is checked.
fn check_database(path: &Path) -> Result<()> {
    let opts = vec![("database".to_string(), path.to_string_lossy().into_owned())];
    validate_options(&opts, OptionContext::Server)?;
    Ok(())
}

#[derive(Args)]
pub struct ImportSchemaArgs {
    /// Path to the sqlite database.
    #[clap(short, long)]
    pub database: PathBuf,

    /// Name of the foreign server the tables belong to.
    #[clap(short, long)]
    pub server: String,

    /// Remote schema, `main` or `public`.
    #[clap(long, default_value = "main")]
    pub remote_schema: String,

    /// Schema the foreign tables are created in.
    #[clap(long, default_value = "public")]
    pub local_schema: String,

    /// Only import these tables.
    #[clap(long, value_delimiter = ',', conflicts_with = "except")]
    pub limit_to: Vec<String>,

    /// Import every table except these.
    #[clap(long, value_delimiter = ',')]
    pub except: Vec<String>,

    /// Import options as `name=value`, e.g. `import_default=true`.
    #[clap(short, long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got '{s}'"))?;
    Ok((k.trim().to_string(), v.trim().to_string()))
}

impl ImportSchemaArgs {
    fn import_list(&self) -> ImportList {
        if !self.limit_to.is_empty() {
            ImportList::LimitTo(self.limit_to.clone())
        } else if !self.except.is_empty() {
            ImportList::Except(self.except.clone())
        } else {
            ImportList::All
        }
    }
}

impl RunCommand for ImportSchemaArgs {
    fn run(self, out: &mut dyn Write) -> Result<()> {
        check_database(&self.database)?;
        let stmt = ImportSchemaStmt {
            remote_schema: self.remote_schema.clone(),
            local_schema: self.local_schema.clone(),
            server_name: self.server.clone(),
            list: self.import_list(),
            options: ImportOptions::from_options(&self.options)?,
        };
        debug!(?stmt, "importing schema");

        for def in import_foreign_schema(&self.database, stmt)? {
            writeln!(out, "{def};\n")?;
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct TranslateTypeArgs {
    /// sqlite declared type names.
    #[clap(required = true)]
    pub types: Vec<String>,
}

impl RunCommand for TranslateTypeArgs {
    fn run(self, out: &mut dyn Write) -> Result<()> {
        for ty in &self.types {
            writeln!(out, "{ty}\t{}", translate_type(ty))?;
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct QueryArgs {
    /// Path to the sqlite database.
    #[clap(short, long)]
    pub database: PathBuf,

    /// Query as it would be sent to sqlite.
    pub query: String,
}

impl RunCommand for QueryArgs {
    fn run(self, out: &mut dyn Write) -> Result<()> {
        check_database(&self.database)?;
        let rows = estimate_rows(&self.database, &self.query)?;
        let cost = foreign_path_cost(rows as f64);
        writeln!(
            out,
            "rows={rows} startup_cost={:.2} total_cost={:.2}",
            cost.startup_cost, cost.total_cost
        )?;
        Ok(())
    }
}

#[derive(Args)]
pub struct ExplainArgs {
    #[clap(flatten)]
    pub query: QueryArgs,

    /// Include the remote query text.
    #[clap(long)]
    pub verbose_plan: bool,
}

impl RunCommand for ExplainArgs {
    fn run(self, out: &mut dyn Write) -> Result<()> {
        check_database(&self.query.database)?;
        let props = explain_scan(&self.query.database, &self.query.query, self.verbose_plan)?;
        for (label, value) in props {
            writeln!(out, "{label}: {value}")?;
        }
        Ok(())
    }
}
