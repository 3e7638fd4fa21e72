//! Public courts of Asa Sul, Brasília, owned by a generic city-hall user.

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::{Id, NewField, NewUser};
use crate::persistence::Repository;
use crate::service::{ServiceResult, hash_password};

pub const OWNER_NAME: &str = "Prefeitura de Brasília";
pub const OWNER_EMAIL: &str = "prefeitura@brasilia.df.gov.br";
const OWNER_PASSWORD: &str = "default_password";

pub const CITY: &str = "Brasilia";
pub const STATE: &str = "DF";

pub struct Court {
    pub name: &'static str,
    pub address: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

pub const ASA_SUL_COURTS: &[Court] = &[
    Court {
        name: "Quadra da SQS 102",
        address: "Superquadra Sul 102, Brasília - DF",
        latitude: -15.8037,
        longitude: -47.8829,
    },
    Court {
        name: "Quadra da SQS 103",
        address: "Superquadra Sul 103, Brasília - DF",
        latitude: -15.8062,
        longitude: -47.8856,
    },
    Court {
        name: "Quadra da SQS 104",
        address: "Superquadra Sul 104, Brasília - DF",
        latitude: -15.8088,
        longitude: -47.8883,
    },
    Court {
        name: "Quadra da SQS 105",
        address: "Superquadra Sul 105, Brasília - DF",
        latitude: -15.8113,
        longitude: -47.8910,
    },
    Court {
        name: "Quadra da SQS 202",
        address: "Superquadra Sul 202, Brasília - DF",
        latitude: -15.8030,
        longitude: -47.8902,
    },
    Court {
        name: "Quadra da SQS 203",
        address: "Superquadra Sul 203, Brasília - DF",
        latitude: -15.8055,
        longitude: -47.8929,
    },
    Court {
        name: "Quadra da SQS 204",
        address: "Superquadra Sul 204, Brasília - DF",
        latitude: -15.8081,
        longitude: -47.8956,
    },
    Court {
        name: "Quadra da SQS 205",
        address: "Superquadra Sul 205, Brasília - DF",
        latitude: -15.8106,
        longitude: -47.8983,
    },
    Court {
        name: "Quadra da SQS 402",
        address: "Superquadra Sul 402, Brasília - DF",
        latitude: -15.8023,
        longitude: -47.8974,
    },
    Court {
        name: "Quadra da SQS 403",
        address: "Superquadra Sul 403, Brasília - DF",
        latitude: -15.8048,
        longitude: -47.9001,
    },
    Court {
        name: "Parque da Cidade (Quadras)",
        address: "Parque da Cidade Sarah Kubitschek, Asa Sul, Brasília - DF",
        latitude: -15.7996,
        longitude: -47.9103,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub owner_id: Id,
    pub created: usize,
    pub skipped: usize,
}

/// Insert the owner and every court that is not stored yet. Safe to rerun.
pub async fn seed_asa_sul(store: &dyn Repository) -> ServiceResult<SeedReport> {
    let owner = match store.user_by_email(OWNER_EMAIL).await? {
        Some(user) => user,
        None => {
            let user = store
                .insert_user(
                    NewUser {
                        name: OWNER_NAME.to_string(),
                        email: OWNER_EMAIL.to_string(),
                        hashed_password: hash_password(OWNER_PASSWORD)?,
                        phone: None,
                    },
                    Utc::now(),
                )
                .await?;
            info!("Created public court owner {} ({})", user.id, user.email);
            user
        }
    };

    let mut report = SeedReport {
        owner_id: owner.id,
        created: 0,
        skipped: 0,
    };
    for court in ASA_SUL_COURTS {
        if store
            .field_by_owner_and_name(owner.id, court.name)
            .await?
            .is_some()
        {
            debug!("Court '{}' already exists, skipping", court.name);
            report.skipped += 1;
            continue;
        }
        store
            .insert_field(NewField {
                owner_id: owner.id,
                name: court.name.to_string(),
                address: court.address.to_string(),
                city: CITY.to_string(),
                state: STATE.to_string(),
                latitude: Some(court.latitude),
                longitude: Some(court.longitude),
            })
            .await?;
        debug!("Added court '{}'", court.name);
        report.created += 1;
    }

    info!(
        "Seeded {} new court(s), {} already present",
        report.created, report.skipped
    );
    Ok(report)
}
