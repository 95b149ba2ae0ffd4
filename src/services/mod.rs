//! Business logic services

pub mod audit;
pub mod catalog;
pub mod circulation;
pub mod clock;
pub mod engine;
pub mod events;
pub mod fines;
pub mod notifier;
pub mod policy;
pub mod reservations;
pub mod settings;
pub mod sweep;

use crate::repository::settings::SettingsRepository;

use self::engine::EngineContext;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub circulation: circulation::CirculationService,
    pub reservations: reservations::ReservationService,
    pub settings: settings::SettingsService,
    pub sweeper: sweep::Sweeper,
}

impl Services {
    /// Create all services over one engine context
    pub fn new(ctx: EngineContext, settings_repository: Option<SettingsRepository>) -> Self {
        let circulation = circulation::CirculationService::new(ctx.clone());
        let reservations = reservations::ReservationService::new(ctx.clone());
        Self {
            catalog: catalog::CatalogService::new(ctx.clone()),
            settings: settings::SettingsService::new(settings_repository, ctx.policy.clone()),
            sweeper: sweep::Sweeper::new(ctx, circulation.clone(), reservations.clone()),
            circulation,
            reservations,
        }
    }
}
