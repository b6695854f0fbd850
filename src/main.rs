use std::{future::IntoFuture, process, sync::Arc};

use pagina::{
    application::error::AppError,
    cache::{Broadcast, LocalBroadcast},
    config,
    infra::{app, error::InfraError, http, telemetry},
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Resolve(args) => run_resolve(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let broadcast: Arc<dyn Broadcast> = Arc::new(LocalBroadcast::new());
    let app = app::build(&settings, broadcast)?;

    let listener_handle = app.coordinator.spawn_listener();
    let result = serve_http(&settings, app.http).await;

    listener_handle.abort();
    let _ = listener_handle.await;

    result
}

async fn run_resolve(settings: config::Settings, args: config::ResolveArgs) -> Result<(), AppError> {
    let broadcast: Arc<dyn Broadcast> = Arc::new(LocalBroadcast::new());
    let app = app::build(&settings, broadcast)?;
    let ctx = app.context_for(&args.host);

    info!(
        target = "pagina::resolve",
        host = %ctx.host,
        repository = %ctx.repository_id,
        branch = %ctx.branch_id,
        path = %args.path,
        "Resolving path"
    );

    let found = app
        .directory
        .resolve(&ctx, &args.path, false)
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    match found {
        Some(found) => {
            println!("pattern:  {}", found.pattern);
            println!("page:     {}", found.page.id);
            println!("template: {}", found.page.template_path);
            for (name, value) in &found.tokens {
                println!("token:    {name} = {value}");
            }
            Ok(())
        }
        None => Err(AppError::NotFound),
    }
}

async fn serve_http(settings: &config::Settings, state: http::HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "pagina::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let shutdown = Arc::new(Notify::new());
    let stop = shutdown.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { stop.notified().await });
    let mut server = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server => return server_result(result),
        () = shutdown_signal() => {}
    }

    info!(
        target = "pagina::serve",
        timeout = ?settings.server.graceful_shutdown,
        "Shutting down"
    );
    shutdown.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(result) => server_result(result),
        Err(_) => {
            warn!(
                target = "pagina::serve",
                "Graceful shutdown timed out; dropping open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
