//! Test fixtures: schemas with matching in-memory tables.
//!
//! Every fixture owns an [`InMemoryRowStore`] whose tables enforce NOT NULL,
//! primary key and foreign key constraints, so a misordered plan fails in
//! the store instead of passing silently.

use crate::faults::{FaultyStore, Faults};
use relmap_core::{
    row, Config, EntitySchema, Heap, Mapper, RelationSchema, Row, RowStore, Schema, SharedHeap,
    ThroughSchema, Transaction, Value,
};
use relmap_core::{Entity, Node};
use relmap_store::{ForeignKey, InMemoryRowStore, Statement, TableDef};
use std::sync::Arc;

/// A schema, a store and a shared heap.
pub struct Fixture {
    /// Store used for inspection; shares its tables with `store`.
    pub rows: InMemoryRowStore,
    /// Store handed to transactions and mappers.
    pub store: Arc<dyn RowStore>,
    /// Entity mappings.
    pub schema: Arc<Schema>,
    /// Identity map shared by transactions and the mapper.
    pub heap: SharedHeap,
    config: Config,
}

impl Fixture {
    /// A fixture over `schema` with freshly created `tables`.
    pub fn new(schema: Schema, tables: Vec<TableDef>) -> Self {
        let rows = InMemoryRowStore::new();
        for table in tables {
            rows.create_table(table);
        }
        Self {
            store: Arc::new(rows.clone()),
            rows,
            schema: Arc::new(schema),
            heap: Heap::shared(),
            config: Config::default(),
        }
    }

    /// Users with posts, nullable notes and an embedded address; posts with
    /// comments and tags.
    ///
    /// | role | table | relations |
    /// |------|-------|-----------|
    /// | `user` | `users` | `posts` (has-many, required), `notes` (has-many, nullable), `address` (embedded) |
    /// | `address` | `users` | embedded |
    /// | `post` | `posts` | `author` (belongs-to user), `comments` (has-many), `tags` (many-to-many via `post_tags`) |
    /// | `note` | `notes` | `owner` (belongs-to user, nullable) |
    /// | `comment` | `comments` | `post` (belongs-to post) |
    /// | `tag` | `tags` | |
    pub fn blog() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("user", "users")
                    .fields(["id", "name"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::has_many("posts", "post", ["user_id"]).order_by(["id"]))
                    .relation(
                        RelationSchema::has_many("notes", "note", ["user_id"])
                            .nullable(true)
                            .order_by(["id"]),
                    )
                    .relation(RelationSchema::embedded("address", "address")),
            )
            .entity(EntitySchema::new("address", "users").fields(["street", "city"]).embedded())
            .entity(
                EntitySchema::new("post", "posts")
                    .fields(["id", "user_id", "title"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("author", "user", ["user_id"]))
                    .relation(RelationSchema::has_many("comments", "comment", ["post_id"]).order_by(["id"]))
                    .relation(RelationSchema::many_to_many(
                        "tags",
                        "tag",
                        ThroughSchema::new("post_tags", ["post_id"], ["tag_id"]),
                    )),
            )
            .entity(
                EntitySchema::new("note", "notes")
                    .fields(["id", "user_id", "body"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("owner", "user", ["user_id"]).nullable(true)),
            )
            .entity(
                EntitySchema::new("comment", "comments")
                    .fields(["id", "post_id", "body"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("post", "post", ["post_id"])),
            )
            .entity(
                EntitySchema::new("tag", "tags")
                    .fields(["id", "label"])
                    .primary_key(["id"])
                    .generated_key(),
            )
            .build()
            .expect("blog schema is valid");

        let tables = vec![
            TableDef::new("users")
                .columns(["id", "name", "street", "city"])
                .primary_key(["id"])
                .auto_increment("id"),
            TableDef::new("posts")
                .columns(["id", "user_id", "title"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["user_id"])
                .foreign_key(ForeignKey::new(["user_id"], "users", ["id"])),
            TableDef::new("notes")
                .columns(["id", "user_id", "body"])
                .primary_key(["id"])
                .auto_increment("id")
                .foreign_key(ForeignKey::new(["user_id"], "users", ["id"])),
            TableDef::new("comments")
                .columns(["id", "post_id", "body"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["post_id"])
                .foreign_key(ForeignKey::new(["post_id"], "posts", ["id"])),
            TableDef::new("tags")
                .columns(["id", "label"])
                .primary_key(["id"])
                .auto_increment("id"),
            TableDef::new("post_tags")
                .columns(["post_id", "tag_id"])
                .primary_key(["post_id", "tag_id"])
                .foreign_key(ForeignKey::new(["post_id"], "posts", ["id"]))
                .foreign_key(ForeignKey::new(["tag_id"], "tags", ["id"])),
        ];
        Self::new(schema, tables)
    }

    /// Roles `a` and `b` pointing at each other. `a.partner` is a nullable
    /// refers-to, `b.partner` a required belongs-to, so only `a` can be
    /// deferred.
    pub fn pair() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("a", "a_rows")
                    .fields(["id", "b_id", "label"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::refers_to("partner", "b", ["b_id"])),
            )
            .entity(
                EntitySchema::new("b", "b_rows")
                    .fields(["id", "a_id", "label"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("partner", "a", ["a_id"])),
            )
            .build()
            .expect("pair schema is valid");
        let tables = vec![
            TableDef::new("a_rows")
                .columns(["id", "b_id", "label"])
                .primary_key(["id"])
                .auto_increment("id")
                .foreign_key(ForeignKey::new(["b_id"], "b_rows", ["id"])),
            TableDef::new("b_rows")
                .columns(["id", "a_id", "label"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["a_id"])
                .foreign_key(ForeignKey::new(["a_id"], "a_rows", ["id"])),
        ];
        Self::new(schema, tables)
    }

    /// Roles `x` and `y` that both require the other's key on insert.
    pub fn locked_pair() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("x", "x_rows")
                    .fields(["id", "y_id"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("partner", "y", ["y_id"])),
            )
            .entity(
                EntitySchema::new("y", "y_rows")
                    .fields(["id", "x_id"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::belongs_to("partner", "x", ["x_id"])),
            )
            .build()
            .expect("locked pair schema is valid");
        let tables = vec![
            TableDef::new("x_rows")
                .columns(["id", "y_id"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["y_id"]),
            TableDef::new("y_rows")
                .columns(["id", "x_id"])
                .primary_key(["id"])
                .auto_increment("id")
                .not_null(["x_id"]),
        ];
        Self::new(schema, tables)
    }

    /// Role `link` with a nullable `next` reference to another link.
    pub fn ring() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("link", "links")
                    .fields(["id", "next_id", "label"])
                    .primary_key(["id"])
                    .generated_key()
                    .relation(RelationSchema::refers_to("next", "link", ["next_id"])),
            )
            .build()
            .expect("ring schema is valid");
        let tables = vec![TableDef::new("links")
            .columns(["id", "next_id", "label"])
            .primary_key(["id"])
            .auto_increment("id")
            .foreign_key(ForeignKey::new(["next_id"], "links", ["id"]))];
        Self::new(schema, tables)
    }

    /// Role `slot` keyed by `(region, num)` with a composite `peer`
    /// reference. Keys are assigned by the caller.
    pub fn composite() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("slot", "slots")
                    .fields(["region", "peer_region", "label"])
                    .column("num", "slot_no")
                    .column("peer_num", "peer_no")
                    .primary_key(["region", "num"])
                    .relation(RelationSchema::refers_to(
                        "peer",
                        "slot",
                        ["peer_region", "peer_num"],
                    )),
            )
            .build()
            .expect("composite schema is valid");
        let tables = vec![TableDef::new("slots")
            .columns(["region", "slot_no", "peer_region", "peer_no", "label"])
            .primary_key(["region", "slot_no"])
            .foreign_key(ForeignKey::new(
                ["peer_region", "peer_no"],
                "slots",
                ["region", "slot_no"],
            ))];
        Self::new(schema, tables)
    }

    /// Routes every write through a [`FaultyStore`] sharing this fixture's
    /// tables.
    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.store = Arc::new(FaultyStore::new(self.rows.clone(), faults));
        self
    }

    /// Sets the configuration of transactions created by
    /// [`Fixture::transaction`].
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// A transaction over the fixture's store, schema and heap.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.store), Arc::clone(&self.schema), Arc::clone(&self.heap))
            .with_config(self.config)
    }

    /// A mapper over the fixture's heap.
    pub fn mapper(&self) -> Mapper {
        Mapper::new(Arc::clone(&self.store), Arc::clone(&self.schema), Arc::clone(&self.heap))
    }

    /// A mapper over a new, empty heap, for reading back what was stored.
    ///
    /// Keep the returned mapper alive while resolving relations of the
    /// entities it loads; their loaders only hold the heap weakly.
    pub fn reload(&self) -> Mapper {
        Mapper::new(Arc::clone(&self.store), Arc::clone(&self.schema), Heap::shared())
    }

    /// Runs `f` against the tracked node of `entity`.
    pub fn with_node<T>(&self, entity: &Entity, f: impl FnOnce(Option<&Node>) -> T) -> T {
        f(self.heap.lock().get(entity))
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.rows.rows(table).len()
    }

    /// Successfully executed statements.
    pub fn statements(&self) -> Vec<Statement> {
        self.rows.statements()
    }

    /// `table` as pretty JSON, for assertion messages.
    pub fn dump(&self, table: &str) -> String {
        serde_json::to_string_pretty(&self.rows.rows(table)).unwrap_or_default()
    }

    /// Seeds a row without logging a statement.
    pub fn seed(&self, table: &str, values: Row) {
        self.rows.seed(table, values).expect("seed row is valid");
    }

    /// A new user with a name.
    pub fn new_user(&self, name: &str) -> Entity {
        Entity::new("user").with_field("name", name)
    }

    /// A new post with a title.
    pub fn new_post(&self, title: &str) -> Entity {
        Entity::new("post").with_field("title", title)
    }

    /// A new `a`/`b` pair pointing at each other.
    pub fn new_pair(&self) -> (Entity, Entity) {
        let a = Entity::new("a").with_field("label", "a");
        let b = Entity::new("b").with_field("label", "b");
        a.set_one("partner", Some(&b));
        b.set_one("partner", Some(&a));
        (a, b)
    }

    /// Seeds a user with `posts` posts, each with one comment, and returns
    /// the user's id.
    pub fn seed_user(&self, name: &str, posts: usize) -> i64 {
        let user = self.rows.rows("users").len() as i64 + 1;
        self.seed("users", row! { "id" => user, "name" => name, "city" => "Dar" });
        for n in 0..posts {
            let post = self.rows.rows("posts").len() as i64 + 1;
            self.seed(
                "posts",
                row! { "id" => post, "user_id" => user, "title" => format!("{name}-{n}") },
            );
            let comment = self.rows.rows("comments").len() as i64 + 1;
            self.seed(
                "comments",
                row! { "id" => comment, "post_id" => post, "body" => "hi" },
            );
        }
        user
    }
}

/// Builds a ring of `len` new links, each pointing at the next.
pub fn new_ring(len: usize) -> Vec<Entity> {
    let links: Vec<Entity> = (0..len)
        .map(|i| Entity::new("link").with_field("label", format!("link-{i}")))
        .collect();
    for (i, link) in links.iter().enumerate() {
        link.set_one("next", Some(&links[(i + 1) % len]));
    }
    links
}

/// Builds a ring of `len` new slots in `region`, each pointing at the next.
pub fn new_slot_ring(region: &str, len: usize) -> Vec<Entity> {
    let slots: Vec<Entity> = (0..len)
        .map(|i| {
            Entity::new("slot")
                .with_field("region", region)
                .with_field("num", i as i64)
                .with_field("label", format!("{region}-{i}"))
        })
        .collect();
    for (i, slot) in slots.iter().enumerate() {
        slot.set_one("peer", Some(&slots[(i + 1) % len]));
    }
    slots
}

/// Integer field value, panicking when absent.
pub fn int(entity: &Entity, field: &str) -> i64 {
    entity
        .get(field)
        .and_then(|v| v.as_integer())
        .unwrap_or_else(|| panic!("{}.{field} is not an integer", entity.role()))
}

/// A row value, `Null` when absent.
pub fn column(row: &Row, name: &str) -> Value {
    row.get(name).cloned().unwrap_or_default()
}
