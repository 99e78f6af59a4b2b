//! 事件模型
//!
//! 订单队列中的消息体是带 `eventType` 判别字段的 JSON 对象。
//! 本模块负责把消息体解码为强类型的 `Event`，并区分三种情况：
//! 已知事件、未知事件类型、无法处理的畸形消息。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 判别字段名
pub const EVENT_TYPE_FIELD: &str = "eventType";

/// 集中管理事件类型字面量，防止字符串散落在各处导致拼写不一致
pub mod event_types {
    pub const ORDER_CREATED: &str = "ORDER_CREATED";
}

// ---------------------------------------------------------------------------
// OrderCreatedEvent
// ---------------------------------------------------------------------------

/// 订单创建事件
///
/// 订单服务下单成功后投递，配送服务据此创建配送任务。
/// 只有 `orderId`、`customerId` 是硬性要求；其余字段按宽松规则解析，
/// 类型不符时退化为缺省值，订单仍会交给配送处理器。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: String,
    pub customer_id: String,
    #[serde(default, deserialize_with = "lenient::items")]
    pub items: Vec<OrderItem>,
    #[serde(
        default,
        deserialize_with = "lenient::amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_amount: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_address: Option<DeliveryAddress>,
    #[serde(
        default,
        deserialize_with = "lenient::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    #[serde(default, deserialize_with = "lenient::quantity")]
    pub quantity: u32,
    #[serde(
        default,
        deserialize_with = "lenient::amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

/// 订单可选字段的宽松解析
///
/// 生产方可能把金额写成字符串、把数量写成 `2.0`。
/// 能换算的换算，换算不了的丢弃为缺省值，不拒收整条订单。
mod lenient {
    use super::*;
    use serde::Deserializer;
    use serde::de::DeserializeOwned;

    pub fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(T::deserialize(value).ok())
    }

    pub fn amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let amount = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(amount.filter(|a| a.is_finite()))
    }

    pub fn quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let quantity = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        Ok(quantity.and_then(|q| u32::try_from(q).ok()).unwrap_or(0))
    }

    /// 逐项解析，无法识别的条目跳过
    pub fn items<'de, D>(deserializer: D) -> Result<Vec<OrderItem>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = match Value::deserialize(deserializer)? {
            Value::Array(values) => values
                .into_iter()
                .filter_map(|v| OrderItem::deserialize(v).ok())
                .collect(),
            _ => Vec::new(),
        };
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// 解码后的队列事件
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OrderCreated(OrderCreatedEvent),
    /// 判别字段存在但不是已知类型
    Unknown { event_type: String },
}

/// 无法解码的消息体
///
/// 判别字段缺失或非法时无法路由，上层按"已处理"删除；
/// `InvalidPayload` 表示已识别类型缺少订单标识，由上层保留等待重投。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedEvent {
    #[error("消息缺少 eventType 字段")]
    MissingEventType,

    #[error("eventType 字段不是字符串")]
    InvalidEventType,

    #[error("事件负载无效: event_type={event_type}, 原因={reason}")]
    InvalidPayload { event_type: String, reason: String },
}

impl Event {
    /// 从消息体解码事件
    ///
    /// `eventType` 为 null 与缺失同等对待。
    pub fn decode(body: &Value) -> Result<Self, MalformedEvent> {
        let event_type = match body.get(EVENT_TYPE_FIELD) {
            None | Some(Value::Null) => return Err(MalformedEvent::MissingEventType),
            Some(Value::String(s)) if s.is_empty() => return Err(MalformedEvent::MissingEventType),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(MalformedEvent::InvalidEventType),
        };

        match event_type {
            event_types::ORDER_CREATED => OrderCreatedEvent::deserialize(body)
                .map(Event::OrderCreated)
                .map_err(|e| MalformedEvent::InvalidPayload {
                    event_type: event_type.to_string(),
                    reason: e.to_string(),
                }),
            other => Ok(Event::Unknown {
                event_type: other.to_string(),
            }),
        }
    }

    /// 事件类型字面量，用于日志
    pub fn event_type(&self) -> &str {
        match self {
            Self::OrderCreated(_) => event_types::ORDER_CREATED,
            Self::Unknown { event_type } => event_type,
        }
    }
}

impl OrderCreatedEvent {
    /// 转换为可投递到队列的消息体（带判别字段）
    pub fn to_message_body(&self) -> serde_json::Result<Value> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = body {
            map.insert(
                EVENT_TYPE_FIELD.to_string(),
                Value::String(event_types::ORDER_CREATED.to_string()),
            );
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
