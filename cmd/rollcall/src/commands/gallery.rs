//! Gallery snapshot commands.

use std::path::Path;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use rollcall_attendance::Resolver;
use rollcall_gallery::{Enrollment, Gallery};

use super::{engine_config, load_gallery, load_request, output_result, print_success};
use crate::Cli;

/// Inspect and edit gallery snapshots.
#[derive(Args)]
pub struct GalleryCommand {
    #[command(subcommand)]
    command: GallerySubcommand,
}

#[derive(Subcommand)]
enum GallerySubcommand {
    /// List enrolled identities
    List {
        /// Gallery snapshot file
        snapshot: String,
    },
    /// Enroll or re-enroll an identity, creating the snapshot if needed
    Enroll {
        /// Gallery snapshot file
        snapshot: String,
        /// Identity id (e.g. roll number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// File with a list of reference embeddings (YAML or JSON)
        #[arg(long)]
        embeddings: String,
        /// Embedding dimension, required when creating a new snapshot
        #[arg(long)]
        dim: Option<usize>,
    },
    /// Add reference embeddings to an existing identity
    Extend {
        snapshot: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        embeddings: String,
    },
    /// Exclude an identity from matching
    Deactivate {
        snapshot: String,
        #[arg(long)]
        id: String,
    },
    /// Include a deactivated identity in matching again
    Reactivate {
        snapshot: String,
        #[arg(long)]
        id: String,
    },
    /// Resolve one embedding against the gallery
    Identify {
        snapshot: String,
        /// File with a single embedding (YAML or JSON)
        #[arg(long)]
        embedding: String,
    },
}

#[derive(Debug, Serialize)]
struct IdentityRow {
    id: String,
    name: String,
    active: bool,
    references: usize,
    enrolled_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GalleryCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            GallerySubcommand::List { snapshot } => {
                let (gallery, _) = load_gallery(cli, snapshot)?;
                let mut rows: Vec<IdentityRow> = gallery
                    .identities()
                    .into_iter()
                    .map(|ident| IdentityRow {
                        references: ident.references.len(),
                        id: ident.id,
                        name: ident.name,
                        active: ident.active,
                        enrolled_at: ident.enrolled_at,
                        updated_at: ident.updated_at,
                    })
                    .collect();
                rows.sort_by(|a, b| a.id.cmp(&b.id));
                output_result(&rows, cli.output.as_deref(), cli.json)
            }
            GallerySubcommand::Enroll {
                snapshot,
                id,
                name,
                embeddings,
                dim,
            } => {
                let gallery = if Path::new(snapshot).exists() {
                    load_gallery(cli, snapshot)?.0
                } else {
                    let dim = dim.ok_or_else(|| {
                        anyhow::anyhow!("{snapshot} does not exist, use --dim to create it")
                    })?;
                    Gallery::new(engine_config(cli, dim)?.gallery)?
                };
                let refs: Vec<Vec<f32>> = load_request(embeddings)?;
                let outcome = gallery.enroll(id, name, &refs)?;
                gallery.save(snapshot)?;
                let verb = match outcome {
                    Enrollment::Created => "enrolled",
                    Enrollment::Replaced => "re-enrolled",
                    Enrollment::Unchanged => "unchanged",
                };
                print_success(&format!("{id} {verb} ({} references)", refs.len()));
                Ok(())
            }
            GallerySubcommand::Extend {
                snapshot,
                id,
                embeddings,
            } => {
                let (gallery, _) = load_gallery(cli, snapshot)?;
                let refs: Vec<Vec<f32>> = load_request(embeddings)?;
                let count = gallery.extend(id, &refs)?;
                gallery.save(snapshot)?;
                print_success(&format!("{id} now has {count} references"));
                Ok(())
            }
            GallerySubcommand::Deactivate { snapshot, id } => {
                let (gallery, _) = load_gallery(cli, snapshot)?;
                gallery.deactivate(id)?;
                gallery.save(snapshot)?;
                print_success(&format!("{id} deactivated"));
                Ok(())
            }
            GallerySubcommand::Reactivate { snapshot, id } => {
                let (gallery, _) = load_gallery(cli, snapshot)?;
                gallery.reactivate(id)?;
                gallery.save(snapshot)?;
                print_success(&format!("{id} reactivated"));
                Ok(())
            }
            GallerySubcommand::Identify {
                snapshot,
                embedding,
            } => {
                let (gallery, cfg) = load_gallery(cli, snapshot)?;
                let values: Vec<f32> = load_request(embedding)?;
                let ranking = gallery.query_raw(&values)?;
                let outcome = Resolver::new(cfg.resolver)?.resolve(&ranking);
                output_result(&outcome, cli.output.as_deref(), cli.json)
            }
        }
    }
}
