use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub String);

macro_rules! string_id {
    ($($name:ident),+) => {
        $(
            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_owned())
                }
            }
        )+
    };
}

string_id!(ProductId, OptionId, ValueId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Color,
    Size,
    Material,
    Feature,
    Accessory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub id: ValueId,
    pub config_option_id: OptionId,
    pub name: String,
    /// Signed amount added once per unit ordered.
    #[serde(default)]
    pub price_modifier: Decimal,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOption {
    pub id: OptionId,
    pub product_id: ProductId,
    pub name: String,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub values: Vec<OptionValue>,
}

impl ConfigOption {
    pub fn value(&self, value_id: &ValueId) -> Option<&OptionValue> {
        self.values.iter().find(|value| &value.id == value_id)
    }

    /// Available values ordered by `display_order`, declaration order on ties.
    pub fn available_values(&self) -> Vec<&OptionValue> {
        let mut values = self.values.iter().filter(|value| value.available).collect::<Vec<_>>();
        values.sort_by_key(|value| value.display_order);
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub base_price: Decimal,
    pub category: String,
    #[serde(default)]
    pub options: Vec<ConfigOption>,
}

impl Product {
    pub fn option(&self, option_id: &OptionId) -> Option<&ConfigOption> {
        self.options.iter().find(|option| &option.id == option_id)
    }

    pub fn value(&self, option_id: &OptionId, value_id: &ValueId) -> Option<&OptionValue> {
        self.option(option_id).and_then(|option| option.value(value_id))
    }

    pub fn ordered_options(&self) -> Vec<&ConfigOption> {
        let mut options = self.options.iter().collect::<Vec<_>>();
        options.sort_by_key(|option| option.display_order);
        options
    }

    pub fn required_options(&self) -> impl Iterator<Item = &ConfigOption> {
        self.options.iter().filter(|option| option.required)
    }
}

fn default_true() -> bool {
    true
}
