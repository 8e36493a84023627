//! CNN models for chest X-ray classification.

mod densenet;

pub use densenet::{
    ClassifierHead, DenseBlock, DenseLayer, DenseNetConfig, DenseNetFeatures, Transition,
    XrayDenseNet, XrayDenseNetRecord,
};
