//! Data models for the recipe API.
//!
//! - `Recipe`, `RecipeIngredient`, `RecipeStep`: recipes as returned by the API
//! - `Ingredient`: the shared ingredient catalog
//! - `RecipePayload` and its inputs: bodies for create/update
//! - `Paginated`, `ActionResponse`: response envelopes
//!
//! Enable the `ts` feature to export TypeScript bindings for the web client.

pub mod recipe;

pub use recipe::{
    ActionResponse, Amount, Ingredient, Paginated, Recipe, RecipeIngredient,
    RecipeIngredientInput, RecipePayload, RecipeStep, RecipeStepInput, StepIngredient,
    StepIngredientDetail, StepIngredientReference,
};
