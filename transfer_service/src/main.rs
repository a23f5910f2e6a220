use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use transfer_service::{
    api::http_routes::{routes, AppState},
    config::AppConfig,
    infrastructure::{
        cache::redis_cache::RedisCacheGateway,
        persistence::{
            limit_repository::PostgresTransferLimitRepository,
            transaction_repository::PostgresTransactionRepository,
            wallet_repository::PostgresWalletRepository,
        },
    },
    use_cases::{
        add_funds::AddFundsUseCase, create_wallet::CreateWalletUseCase,
        execute_transfer::ExecuteTransferUseCase,
        find_by_idempotency_key::FindByIdempotencyKeyUseCase, get_balance::GetBalanceUseCase,
        idempotency::IdempotencyGate, transfer_limits::TransferLimitService,
        transfer_saga::{transfer_steps, SagaCoordinator},
    },
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        transfer_service::api::http_routes::create_wallet,
        transfer_service::api::http_routes::initiate_transfer,
        transfer_service::api::http_routes::add_funds,
        transfer_service::api::http_routes::get_balance,
        transfer_service::api::http_routes::get_transfer_limits,
        transfer_service::api::http_routes::find_by_idempotency_key
    ),
    components(schemas(
        transfer_service::api::http_routes::CreateWalletRequest,
        transfer_service::api::http_routes::TransferRequest,
        transfer_service::api::http_routes::AddFundsRequest,
        transfer_service::api::http_routes::WalletResponse,
        transfer_service::api::http_routes::BalanceResponse,
        transfer_service::api::http_routes::IdempotencyLookupResponse,
        transfer_service::use_cases::execute_transfer::TransferReceipt,
        transfer_service::use_cases::transfer_limits::LimitSummary
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar variables de entorno
    dotenv().ok();

    // 2. Configurar Logging/Tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting Transfer Service...");

    let config = AppConfig::from_env()?;

    // 3. Configurar Conexión a Base de Datos y Cache
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    info!("Connected to Database");

    let cache = Arc::new(RedisCacheGateway::connect(&config.redis_url).await?);

    info!("Connected to Cache");

    // 4. Instanciar Dependencias (Infraestructura)
    let wallet_repo = Arc::new(PostgresWalletRepository::new(pool.clone()));
    let transaction_repo = Arc::new(PostgresTransactionRepository::new(pool.clone()));
    let limit_repo = Arc::new(PostgresTransferLimitRepository::new(pool.clone()));

    // 5. Instanciar Servicios y Casos de Uso
    let limit_service = Arc::new(TransferLimitService::new(
        limit_repo.clone(),
        cache.clone(),
        config.default_daily_limit,
        config.default_monthly_limit,
    ));
    let gate = Arc::new(IdempotencyGate::new(transaction_repo.clone(), cache.clone()));
    let coordinator = Arc::new(SagaCoordinator::new(
        transfer_steps(
            wallet_repo.clone(),
            cache.clone(),
            limit_service.clone(),
            config.write_lock_timeout,
        ),
        transaction_repo.clone(),
    ));

    let create_wallet_use_case = CreateWalletUseCase::new(wallet_repo.clone(), cache.clone());
    let add_funds_use_case = AddFundsUseCase::new(
        wallet_repo.clone(),
        cache.clone(),
        config.write_lock_timeout,
    );
    let get_balance_use_case = GetBalanceUseCase::new(
        wallet_repo.clone(),
        cache.clone(),
        config.read_lock_timeout,
        config.balance_cache_freshness,
    );
    let execute_transfer_use_case = ExecuteTransferUseCase::new(
        transaction_repo.clone(),
        limit_service.clone(),
        gate,
        coordinator.clone(),
    );
    let find_by_idempotency_key_use_case =
        FindByIdempotencyKeyUseCase::new(transaction_repo.clone(), wallet_repo.clone());

    // 6. Configurar Estado de la App Axum
    let app_state = Arc::new(AppState {
        create_wallet_use_case,
        add_funds_use_case,
        get_balance_use_case,
        execute_transfer_use_case,
        find_by_idempotency_key_use_case,
        limit_service,
    });

    // 7. Iniciar Background Jobs (Recuperación de sagas atascadas)
    let job = transfer_service::jobs::recovery::SagaRecoveryJob::new(
        transaction_repo,
        wallet_repo,
        coordinator,
    );

    tokio::spawn(async move {
        // Intervalo de ejecución: cada 60 segundos
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));

        info!("Saga recovery job scheduler started");

        loop {
            interval.tick().await;
            job.run().await;
        }
    });

    // 8. Configurar Rutas y Servidor
    let app = routes(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = format!("{}:{}", config.host, config.port);

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
