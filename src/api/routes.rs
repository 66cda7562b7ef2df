use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chains", web::get().to(handlers::list_chains))
            .route("/chains/{name}", web::get().to(handlers::get_home))
            .route("/chains/{name}/blocks", web::get().to(handlers::get_chain))
            .route("/chains/{name}/validate", web::get().to(handlers::validate_chain))
            .route("/chains/{name}/balance/{address}", web::get().to(handlers::get_balance))
            .route("/chains/{from}/partner/{chain}", web::get().to(handlers::get_partner))
            .route("/mine", web::post().to(handlers::mine))
            .route("/transfer", web::post().to(handlers::transfer))
    );
}
