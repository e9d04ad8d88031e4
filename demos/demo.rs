use quartz::{DatabaseManager, ManagerConfig, Outcome, QueryResult, Value};
use tracing_subscriber::EnvFilter;

fn print_result(result: &QueryResult) {
    let header: Vec<String> = result.columns.iter().map(|c| format!("{c:<12}")).collect();
    println!("{}", header.join(" "));
    println!("{}", "-".repeat(13 * result.columns.len()));
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::Null => format!("{:<12}", "NULL"),
                other => format!("{:<12}", other.to_string()),
            })
            .collect();
        println!("{}", cells.join(" "));
    }
    println!();
}

fn main() -> quartz::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quartz=info".parse().map_err(
            |e| quartz::Error::InvalidOperation(format!("bad log directive: {e}")),
        )?))
        .init();

    // Keep the demo away from the user's real data unless asked otherwise.
    let config = match std::env::var_os(quartz::config::DATA_DIR_ENV) {
        Some(_) => ManagerConfig::from_env(),
        None => ManagerConfig::with_data_dir(std::env::temp_dir().join("quartz_demo")),
    };
    let mut manager = DatabaseManager::open(config.autosave(true))?;
    println!("Active database: {}\n", manager.active_name());

    if !manager.database_exists("demo") {
        manager.create_database("demo")?;
    } else if manager.active_name() != "demo" {
        manager.use_database("demo")?;
    }

    manager.execute_script(
        "DROP TABLE IF EXISTS users;
         CREATE TABLE users (
             id SERIAL PRIMARY KEY,
             name VARCHAR NOT NULL UNIQUE,
             age INT CHECK (age >= 0),
             joined DATE DEFAULT CURRENT_DATE
         );
         INSERT INTO users (name, age) VALUES ('Alice', 30), ('Bob', NULL), ('Charlie', 25);
         INSERT INTO users (name, age) VALUES ('Alice', 31)
             ON CONFLICT (name) DO UPDATE SET age = excluded.age;",
    )?;

    println!("Reading data:");
    print_result(&manager.query("SELECT id, name, age FROM users ORDER BY id")?);

    manager.execute(
        "CREATE OR REPLACE VIEW adults AS SELECT name, age FROM users WHERE age >= 18",
    )?;
    println!("Through a view:");
    print_result(&manager.query("SELECT * FROM adults ORDER BY age DESC")?);

    if let Outcome::Rows(tables) = manager.execute("CALL list_tables()")? {
        println!("Tables in database:");
        print_result(&tables);
    }

    if let Outcome::Rows(databases) = manager.execute("CALL list_databases()")? {
        println!("Known databases:");
        print_result(&databases);
    }

    Ok(())
}
