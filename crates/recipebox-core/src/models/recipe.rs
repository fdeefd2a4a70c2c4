use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Ingredient amount. The API serializes decimals as strings on read but
/// accepts plain numbers on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Amount::Number(n) => Some(*n),
            Amount::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(n) => write!(f, "{}", n),
            Amount::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Amount {
    fn from(n: f64) -> Self {
        Amount::Number(n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
}

/// An ingredient as used by one recipe, with its quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct RecipeIngredient {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    pub amount: Amount,
    #[serde(default)]
    pub unit: String,
}

impl RecipeIngredient {
    /// e.g. "2 cups flour"
    pub fn display(&self) -> String {
        if self.unit.is_empty() {
            format!("{} {}", self.amount, self.name)
        } else {
            format!("{} {} {}", self.amount, self.unit, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct StepIngredient {
    #[serde(default)]
    pub id: Option<i64>,
    pub ingredient: StepIngredientDetail,
}

/// Recipe ingredient referenced by a step. Carries the ingredient id, not its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct StepIngredientDetail {
    #[serde(default)]
    pub id: Option<i64>,
    pub amount: Amount,
    #[serde(default)]
    pub unit: String,
    pub ingredient: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct RecipeStep {
    #[serde(default)]
    pub id: Option<i64>,
    pub order: u32,
    pub step: String,
    #[serde(default)]
    pub step_ingredients: Vec<StepIngredient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default)]
    pub recipe_steps: Vec<RecipeStep>,
}

impl Recipe {
    /// Steps in display order
    pub fn ordered_steps(&self) -> Vec<&RecipeStep> {
        let mut steps: Vec<&RecipeStep> = self.recipe_steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Reply of the backup and restore actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct ActionResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.as_deref() == Some("success")
    }
}

// ============================================================================
// Create / update payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct RecipeIngredientInput {
    pub name: String,
    pub amount: Amount,
    #[serde(default)]
    pub unit: String,
}

/// Points at an entry of `RecipePayload::ingredients` by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct StepIngredientReference {
    pub ingredient_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct RecipeStepInput {
    pub order: u32,
    pub step: String,
    #[serde(default)]
    pub ingredients: Vec<StepIngredientReference>,
}

/// Body for creating or replacing a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct RecipePayload {
    pub name: String,
    pub ingredients: Vec<RecipeIngredientInput>,
    pub steps: Vec<RecipeStepInput>,
}

impl RecipePayload {
    /// Check what the server would reject, before sending.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Recipe name is required".to_string());
        }
        for ingredient in &self.ingredients {
            if ingredient.name.trim().is_empty() {
                return Err("Ingredient name is required".to_string());
            }
            if ingredient.amount.as_f64().is_none() {
                return Err(format!("Invalid amount for {}", ingredient.name));
            }
        }
        for step in &self.steps {
            if step.order < 1 {
                return Err("Step order must start at 1".to_string());
            }
            if let Some(bad) = step
                .ingredients
                .iter()
                .find(|r| r.ingredient_index >= self.ingredients.len())
            {
                return Err(format!(
                    "Step {} references unknown ingredient {}",
                    step.order, bad.ingredient_index
                ));
            }
        }
        Ok(())
    }
}
