//! The catalog and project-planning schema, one migration per release step.
//!
//! Append new migrations at the end. Never edit or reorder a shipped entry:
//! databases in the field have already recorded it by name.

use joinery_common::Result;
use rusqlite::Connection;

use crate::migrations::{Catalog, Migration};

const CREATE_USERS: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

const CREATE_CATEGORIES: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_categories_parent
    ON categories(parent_id, sort_order);
";

const CREATE_ITEMS: &str = "
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id INTEGER NOT NULL REFERENCES categories(id),
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    width_mm INTEGER NOT NULL,
    height_mm INTEGER NOT NULL,
    depth_mm INTEGER NOT NULL,
    unit_price_cents INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_items_name ON items(name);
";

const CREATE_PROJECTS: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    room TEXT,
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK(status IN ('draft', 'quoted', 'ordered', 'installed', 'archived')),
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_projects_owner
    ON projects(owner_id, updated_at);
";

const CREATE_PROJECT_ITEMS: &str = "
CREATE TABLE IF NOT EXISTS project_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL REFERENCES items(id),
    quantity INTEGER NOT NULL DEFAULT 1 CHECK(quantity > 0),
    wall TEXT NOT NULL,
    position_mm INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_project_items_project
    ON project_items(project_id);
";

// Superseded by `finishes` + `item_finish_options` in 009.
const CREATE_ITEM_FINISHES: &str = "
CREATE TABLE IF NOT EXISTS item_finishes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    finish TEXT NOT NULL,
    price_delta_cents INTEGER NOT NULL DEFAULT 0,
    UNIQUE(item_id, finish)
);
";

/// Loose items (fillers, panels) have no wall placement, so `wall` and
/// `position_mm` become nullable. SQLite cannot relax NOT NULL in place.
const REBUILD_PROJECT_ITEMS: &str = "
CREATE TABLE project_items_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL REFERENCES items(id),
    quantity INTEGER NOT NULL DEFAULT 1 CHECK(quantity > 0),
    wall TEXT,
    position_mm INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT INTO project_items_new (id, project_id, item_id, quantity, wall, position_mm, created_at)
    SELECT id, project_id, item_id, quantity, wall, position_mm, created_at
    FROM project_items;

DROP TABLE project_items;
ALTER TABLE project_items_new RENAME TO project_items;

CREATE INDEX IF NOT EXISTS idx_project_items_project
    ON project_items(project_id);
";

const MOVE_ITEM_FINISHES: &str = "
CREATE TABLE IF NOT EXISTS finishes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS item_finish_options (
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    finish_id INTEGER NOT NULL REFERENCES finishes(id),
    price_delta_cents INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (item_id, finish_id)
);

INSERT OR IGNORE INTO finishes (name)
    SELECT DISTINCT finish FROM item_finishes ORDER BY finish;

INSERT INTO item_finish_options (item_id, finish_id, price_delta_cents)
    SELECT f.item_id, n.id, f.price_delta_cents
    FROM item_finishes f
    JOIN finishes n ON n.name = f.finish;

DROP TABLE item_finishes;
";

const ADD_USERS_IS_ADMIN: &str = "
ALTER TABLE users ADD COLUMN is_admin INTEGER NOT NULL DEFAULT 0;
";

const REPLACE_ITEMS_NAME_INDEX: &str = "
DROP INDEX IF EXISTS idx_items_name;
CREATE INDEX IF NOT EXISTS idx_items_category_name ON items(category_id, name);
";

/// Some early installs hand-added `items.material`; only add it when missing,
/// then backfill from the category slug.
fn add_items_material(conn: &Connection) -> rusqlite::Result<()> {
    let has_column: bool = conn.query_row(
        "SELECT count(*) > 0 FROM pragma_table_info('items') WHERE name = 'material'",
        [],
        |row| row.get(0),
    )?;
    if !has_column {
        conn.execute_batch("ALTER TABLE items ADD COLUMN material TEXT;")?;
    }

    conn.execute(
        "UPDATE items SET material = CASE
            WHEN category_id IN (SELECT id FROM categories WHERE slug LIKE '%oak%') THEN 'oak'
            WHEN category_id IN (SELECT id FROM categories WHERE slug LIKE '%walnut%') THEN 'walnut'
            ELSE 'unspecified'
         END
         WHERE material IS NULL",
        [],
    )?;
    Ok(())
}

/// Every shipped migration, in release order.
pub fn definitions() -> Vec<Migration> {
    vec![
        Migration::sql("001_create_users_table", CREATE_USERS),
        Migration::sql("002_create_categories_table", CREATE_CATEGORIES),
        Migration::sql("003_create_items_table", CREATE_ITEMS),
        Migration::sql("004_create_projects_table", CREATE_PROJECTS),
        Migration::sql("005_create_project_items_table", CREATE_PROJECT_ITEMS),
        Migration::sql("006_create_item_finishes_table", CREATE_ITEM_FINISHES),
        Migration::code("007_add_items_material", add_items_material),
        Migration::sql("008_relax_project_items_placement", REBUILD_PROJECT_ITEMS),
        Migration::sql("009_move_item_finishes_to_finishes", MOVE_ITEM_FINISHES),
        Migration::sql("010_add_users_is_admin", ADD_USERS_IS_ADMIN),
        Migration::sql("011_replace_items_name_index", REPLACE_ITEMS_NAME_INDEX),
    ]
}

pub fn catalog() -> Result<Catalog> {
    Catalog::new(definitions())
}
