//! Ready-made [`MirrorObject`] implementations.
//!
//! These cover the object shapes most services publish: a mapping, a
//! sequence, a bag of named attributes, and a callable. Anything richer is a
//! direct `MirrorObject` impl in the host program.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use nomir_common::{Dict, Handle, List, MirrorObject, NomirError, Result, Value};

/// A published mapping: item access, length, and textual conversion.
pub struct DictObject {
    data: Dict,
}

impl DictObject {
    pub fn new(data: Dict) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Dict {
        &self.data
    }

    pub fn handle(data: Dict) -> Handle {
        std::sync::Arc::new(Self::new(data))
    }
}

#[async_trait]
impl MirrorObject for DictObject {
    async fn get_item(&self, key: &Value) -> Result<Value> {
        self.data
            .get(key)
            .ok_or_else(|| NomirError::not_found(format!("key {key:?}")))
    }

    async fn set_item(&self, key: Value, value: Value) -> Result<()> {
        self.data.insert(key, value);
        Ok(())
    }

    async fn del_item(&self, key: &Value) -> Result<()> {
        self.data
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| NomirError::not_found(format!("key {key:?}")))
    }

    async fn len(&self) -> Result<i64> {
        Ok(self.data.len() as i64)
    }

    async fn str_text(&self) -> Result<String> {
        Ok(Value::Map(self.data.clone()).to_string())
    }

    async fn repr_text(&self) -> Result<String> {
        Ok(format!("DictObject({})", Value::Map(self.data.clone())))
    }
}

/// A published sequence with integer indexing. Negative indexes count from
/// the end, like the object systems this runtime mirrors.
pub struct ListObject {
    data: List,
}

impl ListObject {
    pub fn new(data: List) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &List {
        &self.data
    }

    pub fn handle(data: List) -> Handle {
        std::sync::Arc::new(Self::new(data))
    }

    fn index(&self, key: &Value) -> Result<usize> {
        let raw = key
            .as_int()
            .ok_or_else(|| NomirError::unsupported(format!("{} index", key.type_name())))?;
        let len = self.data.len() as i64;
        let resolved = if raw < 0 { raw + len } else { raw };
        if resolved < 0 || resolved >= len {
            return Err(NomirError::not_found(format!(
                "index {raw} out of range for length {len}"
            )));
        }
        Ok(resolved as usize)
    }
}

#[async_trait]
impl MirrorObject for ListObject {
    async fn get_item(&self, key: &Value) -> Result<Value> {
        let index = self.index(key)?;
        self.data
            .get(index)
            .ok_or_else(|| NomirError::not_found(format!("index {index}")))
    }

    async fn set_item(&self, key: Value, value: Value) -> Result<()> {
        let index = self.index(&key)?;
        if self.data.set(index, value) {
            Ok(())
        } else {
            Err(NomirError::not_found(format!("index {index}")))
        }
    }

    async fn del_item(&self, key: &Value) -> Result<()> {
        let index = self.index(key)?;
        self.data
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| NomirError::not_found(format!("index {index}")))
    }

    async fn len(&self) -> Result<i64> {
        Ok(self.data.len() as i64)
    }

    async fn str_text(&self) -> Result<String> {
        Ok(Value::List(self.data.clone()).to_string())
    }

    async fn repr_text(&self) -> Result<String> {
        Ok(format!("ListObject({})", Value::List(self.data.clone())))
    }
}

/// A bag of named attributes. Methods are just callable values stored under
/// a name, so `obj.greet("x")` is a GETATTR followed by a CALL.
#[derive(Default)]
pub struct AttrObject {
    fields: RwLock<HashMap<String, Value>>,
}

impl AttrObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field seeding before the object is registered.
    pub fn with(self, name: &str, value: Value) -> Self {
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_owned(), value);
        self
    }

    pub fn into_handle(self) -> Handle {
        std::sync::Arc::new(self)
    }
}

#[async_trait]
impl MirrorObject for AttrObject {
    async fn get_attr(&self, name: &str) -> Result<Value> {
        self.fields
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| NomirError::not_found(format!("attribute {name}")))
    }

    async fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_owned(), value);
        Ok(())
    }

    async fn del_attr(&self, name: &str) -> Result<()> {
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NomirError::not_found(format!("attribute {name}")))
    }

    async fn str_text(&self) -> Result<String> {
        let mut names: Vec<String> = self
            .fields
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(format!("<object {}>", names.join(", ")))
    }

    async fn repr_text(&self) -> Result<String> {
        self.str_text().await
    }
}

type BoxedFn = Box<dyn Fn(Vec<Value>, Dict) -> Result<Value> + Send + Sync>;

/// A callable object wrapping a host closure.
pub struct FnObject {
    func: BoxedFn,
}

impl FnObject {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<Value>, Dict) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    pub fn handle<F>(func: F) -> Handle
    where
        F: Fn(Vec<Value>, Dict) -> Result<Value> + Send + Sync + 'static,
    {
        std::sync::Arc::new(Self::new(func))
    }
}

#[async_trait]
impl MirrorObject for FnObject {
    async fn call(&self, args: Vec<Value>, kwargs: Dict) -> Result<Value> {
        (self.func)(args, kwargs)
    }

    async fn str_text(&self) -> Result<String> {
        Ok("<function>".to_owned())
    }

    async fn repr_text(&self) -> Result<String> {
        Ok("<function>".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dict() -> Dict {
        let d = Dict::new();
        d.insert(Value::from("a"), Value::Int(1));
        d.insert(Value::from("b"), Value::Int(2));
        d
    }

    #[tokio::test]
    async fn dict_object_item_access() {
        let obj = DictObject::new(sample_dict());
        assert_eq!(obj.get_item(&Value::from("a")).await.unwrap(), Value::Int(1));
        assert_eq!(obj.len().await.unwrap(), 2);

        obj.set_item(Value::from("c"), Value::Int(3)).await.unwrap();
        assert_eq!(obj.len().await.unwrap(), 3);

        obj.del_item(&Value::from("a")).await.unwrap();
        assert!(matches!(
            obj.get_item(&Value::from("a")).await,
            Err(NomirError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dict_object_rejects_attr_access() {
        let obj = DictObject::new(sample_dict());
        assert!(matches!(
            obj.get_attr("a").await,
            Err(NomirError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn list_object_indexing() {
        let obj = ListObject::new(List::from_vec(vec![
            Value::Int(2),
            Value::Int(3),
            Value::Int(5),
        ]));
        assert_eq!(obj.len().await.unwrap(), 3);
        assert_eq!(obj.get_item(&Value::Int(1)).await.unwrap(), Value::Int(3));
        assert_eq!(obj.get_item(&Value::Int(-1)).await.unwrap(), Value::Int(5));

        obj.set_item(Value::Int(0), Value::Int(7)).await.unwrap();
        assert_eq!(obj.get_item(&Value::Int(0)).await.unwrap(), Value::Int(7));

        assert!(matches!(
            obj.get_item(&Value::Int(3)).await,
            Err(NomirError::NotFound(_))
        ));
        assert!(matches!(
            obj.get_item(&Value::from("x")).await,
            Err(NomirError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn list_object_delete_shifts() {
        let obj = ListObject::new(List::from_vec(vec![Value::Int(1), Value::Int(2)]));
        obj.del_item(&Value::Int(0)).await.unwrap();
        assert_eq!(obj.len().await.unwrap(), 1);
        assert_eq!(obj.get_item(&Value::Int(0)).await.unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn attr_object_fields() {
        let obj = AttrObject::new().with("greeting", Value::from("hi"));
        assert_eq!(
            obj.get_attr("greeting").await.unwrap(),
            Value::from("hi")
        );

        obj.set_attr("n", Value::Int(1)).await.unwrap();
        obj.del_attr("n").await.unwrap();
        assert!(matches!(
            obj.get_attr("n").await,
            Err(NomirError::NotFound(_))
        ));
        assert_eq!(obj.str_text().await.unwrap(), "<object greeting>");
    }

    #[tokio::test]
    async fn fn_object_invokes_closure() {
        let obj = FnObject::new(|args, _kwargs| {
            let n = args.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(n * 2))
        });
        let result = obj.call(vec![Value::Int(21)], Dict::new()).await.unwrap();
        assert_eq!(result, Value::Int(42));
        assert_eq!(obj.str_text().await.unwrap(), "<function>");
    }

    #[tokio::test]
    async fn renderings_match_value_display() {
        let obj = DictObject::new(sample_dict());
        assert_eq!(obj.str_text().await.unwrap(), "{\"a\": 1, \"b\": 2}");

        let seq = ListObject::new(List::from_vec(vec![Value::Int(1)]));
        assert_eq!(seq.str_text().await.unwrap(), "[1]");
    }
}
