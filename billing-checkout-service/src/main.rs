use billing_checkout_service::{create_app, runner_from_env};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "billing_checkout_service=debug,checkout_flow=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Check required environment variables
    if std::env::var("BILLING_API_URL").is_err() {
        eprintln!("Error: BILLING_API_URL environment variable is required");
        std::process::exit(1);
    }

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let runner = runner_from_env()?;
    let app = create_app(runner);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let addr = listener.local_addr()?;

    info!("Billing Checkout Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Checkout endpoint: POST http://{}/checkout", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
