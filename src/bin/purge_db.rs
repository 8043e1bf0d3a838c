//! Development helper: drop and recreate the workflow schema, optionally
//! seeding a couple of demo requests (`purge_db --seed`).

use sqlx::postgres::PgPoolOptions;
use std::env;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let seed = env::args().any(|a| a == "--seed");
    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/seferet".to_string());

    println!("Connecting to {}", database_url);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    println!("Resetting database schema...");
    sqlx::query("DROP SCHEMA public CASCADE")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE SCHEMA public").execute(&pool).await?;

    println!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    if seed {
        println!("Seeding demo requests...");
        let customer = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let provider = Uuid::new_v4();

        // A pending service request and a pending ad, ready to approve from
        // the CLI or the API.
        sqlx::query(
            "INSERT INTO requests (id, kind, owner_kind, owner_id, counterpart_kind, counterpart_id, subject_id, status, priority)
             VALUES ($1, 'service_request', 'customer', $2, 'agent', $3, $4, 'pending', 0)",
        )
        .bind(Uuid::new_v4())
        .bind(customer)
        .bind(agent)
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await?;

        sqlx::query(
            "INSERT INTO requests (id, kind, owner_kind, owner_id, counterpart_kind, counterpart_id, subject_id, status, priority)
             VALUES ($1, 'ad', 'provider', $2, 'agent', $3, $4, 'pending', 5)",
        )
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(agent)
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await?;

        println!("  customer: customer:{}", customer);
        println!("  provider: provider:{}", provider);
    }

    println!("Database reset successfully.");
    Ok(())
}
