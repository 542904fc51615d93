//! Property-based test generators using proptest.
//!
//! Strategies produce plain shapes; the `build` methods turn a shape into
//! new, unsaved entities for the matching [`crate::Fixture`].

use proptest::prelude::*;
use relmap_core::Entity;
use serde::{Deserialize, Serialize};

/// A reference ring and the member handed to `persist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingCase {
    /// Number of members.
    pub len: usize,
    /// Index of the persisted member.
    pub entry: usize,
}

/// Strategy for rings of 1 to `max_len` members with any entry point.
pub fn ring_strategy(max_len: usize) -> impl Strategy<Value = RingCase> {
    (1..=max_len.max(1)).prop_flat_map(|len| (Just(len), 0..len).prop_map(|(len, entry)| RingCase { len, entry }))
}

/// Shape of one user in a [`Forest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserShape {
    /// User name.
    pub name: String,
    /// Comment count of each post.
    pub posts: Vec<usize>,
    /// Number of notes.
    pub notes: usize,
    /// Whether the user has an address.
    pub address: bool,
}

/// Users with posts, comments and notes for the blog fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forest {
    /// Root users.
    pub users: Vec<UserShape>,
}

impl Forest {
    /// Total number of rows the forest occupies, per table:
    /// `(users, posts, comments, notes)`.
    pub fn row_counts(&self) -> (usize, usize, usize, usize) {
        let posts = self.users.iter().map(|u| u.posts.len()).sum();
        let comments = self.users.iter().flat_map(|u| &u.posts).sum();
        let notes = self.users.iter().map(|u| u.notes).sum();
        (self.users.len(), posts, comments, notes)
    }

    /// Builds the root users. Children are reachable through `posts`,
    /// `notes`, `comments` and `address`.
    pub fn build(&self) -> Vec<Entity> {
        self.users
            .iter()
            .map(|shape| {
                let user = Entity::new("user").with_field("name", shape.name.as_str());
                let posts = shape
                    .posts
                    .iter()
                    .enumerate()
                    .map(|(i, comments)| {
                        let post = Entity::new("post").with_field("title", format!("{}-{i}", shape.name));
                        let comments = (0..*comments)
                            .map(|c| Entity::new("comment").with_field("body", format!("c{c}")))
                            .collect();
                        post.set_many("comments", comments);
                        post
                    })
                    .collect();
                user.set_many("posts", posts);
                let notes = (0..shape.notes)
                    .map(|n| Entity::new("note").with_field("body", format!("n{n}")))
                    .collect();
                user.set_many("notes", notes);
                if shape.address {
                    let address = Entity::new("address")
                        .with_field("street", "Main")
                        .with_field("city", shape.name.as_str());
                    user.set_one("address", Some(&address));
                }
                user
            })
            .collect()
    }
}

/// Strategy for short lowercase names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex")
}

/// Strategy for one user shape.
pub fn user_shape_strategy() -> impl Strategy<Value = UserShape> {
    (
        name_strategy(),
        prop::collection::vec(0usize..3, 0..4),
        0usize..3,
        any::<bool>(),
    )
        .prop_map(|(name, posts, notes, address)| UserShape {
            name,
            posts,
            notes,
            address,
        })
}

/// Strategy for forests of 1 to `max_users` users.
pub fn forest_strategy(max_users: usize) -> impl Strategy<Value = Forest> {
    prop::collection::vec(user_shape_strategy(), 1..=max_users.max(1)).prop_map(|users| Forest { users })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn ring_entry_is_a_member(case in ring_strategy(6)) {
            prop_assert!(case.len >= 1 && case.len <= 6);
            prop_assert!(case.entry < case.len);
        }

        #[test]
        fn forest_builds_one_root_per_shape(forest in forest_strategy(4)) {
            let roots = forest.build();
            prop_assert_eq!(roots.len(), forest.users.len());
            let (_, posts, _, notes) = forest.row_counts();
            let built_posts: usize = roots.iter().map(|u| u.related_many("posts").len()).sum();
            let built_notes: usize = roots.iter().map(|u| u.related_many("notes").len()).sum();
            prop_assert_eq!(built_posts, posts);
            prop_assert_eq!(built_notes, notes);
        }
    }

    #[test]
    fn shapes_serialize() {
        let forest = Forest {
            users: vec![UserShape {
                name: "ann".into(),
                posts: vec![2],
                notes: 1,
                address: false,
            }],
        };
        let json = serde_json::to_string(&forest).unwrap();
        let back: Forest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, forest);
    }
}
