//! Nodes bundling the coordinate DOFs of a point in space.
use crate::dof::Dof;
use nalgebra::{Point3, Vector3};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug)]
struct NodeData {
    x: Dof,
    y: Dof,
    z: Dof,
    variables: RwLock<FxHashMap<String, Dof>>,
}

/// A point in space with one free [`Dof`] per coordinate and any number of named variables.
///
/// Cloning a node yields another handle to the same DOFs.
#[derive(Debug, Clone)]
pub struct Node {
    data: Arc<NodeData>,
}

impl Node {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            data: Arc::new(NodeData {
                x: Dof::new(x),
                y: Dof::new(y),
                z: Dof::new(z),
                variables: RwLock::new(FxHashMap::default()),
            }),
        }
    }

    pub fn from_point(point: &Point3<f64>) -> Self {
        Self::new(point.x, point.y, point.z)
    }

    pub fn x(&self) -> Dof {
        self.data.x.clone()
    }

    pub fn y(&self) -> Dof {
        self.data.y.clone()
    }

    pub fn z(&self) -> Dof {
        self.data.z.clone()
    }

    /// The coordinate DOFs in the order `x`, `y`, `z`.
    pub fn dofs(&self) -> [Dof; 3] {
        [self.x(), self.y(), self.z()]
    }

    pub fn ref_location(&self) -> Point3<f64> {
        Point3::new(self.data.x.ref_value(), self.data.y.ref_value(), self.data.z.ref_value())
    }

    pub fn set_ref_location(&self, location: &Point3<f64>) {
        for (dof, value) in self.dofs().iter().zip(location.iter()) {
            dof.set_ref_value(*value);
        }
    }

    pub fn act_location(&self) -> Point3<f64> {
        Point3::new(self.data.x.act_value(), self.data.y.act_value(), self.data.z.act_value())
    }

    pub fn set_act_location(&self, location: &Point3<f64>) {
        for (dof, value) in self.dofs().iter().zip(location.iter()) {
            dof.set_act_value(*value);
        }
    }

    /// The displacement `act_location - ref_location`.
    pub fn displacements(&self) -> Vector3<f64> {
        Vector3::new(self.data.x.delta(), self.data.y.delta(), self.data.z.delta())
    }

    pub fn set_displacements(&self, displacements: &Vector3<f64>) {
        for (dof, value) in self.dofs().iter().zip(displacements.iter()) {
            dof.set_delta(*value);
        }
    }

    /// Returns the named variable of this node, creating a free DOF with reference value zero
    /// if it does not exist yet.
    ///
    /// The names `"x"`, `"y"` and `"z"` refer to the coordinate DOFs.
    pub fn variable(&self, name: &str) -> Dof {
        match name {
            "x" => return self.x(),
            "y" => return self.y(),
            "z" => return self.z(),
            _ => {}
        }
        if let Some(dof) = self.data.variables.read().get(name) {
            return dof.clone();
        }
        self.data
            .variables
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        matches!(name, "x" | "y" | "z") || self.data.variables.read().contains_key(name)
    }

    /// Returns `true` if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
