pub mod fields;
pub mod heap;
pub mod index;
pub mod object;

pub use fields::HeapValue;
pub use heap::HeapGraph;
pub use index::HprofIndex;
pub use object::{
    HeapClass, HeapField, HeapInstance, HeapObject, HeapObjectArray, HeapPrimitiveArray,
};
