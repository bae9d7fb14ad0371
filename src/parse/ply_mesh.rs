//! Builds a [`GeomMesh`] from the `vertex` and `face` elements of a PLY file.
//!
//! The header decides what gets stored: positions and a face vertex list are
//! mandatory, normals, one texture coordinate pair and per-face tags are kept
//! only when the file declares them completely. Polygons are fan-triangulated
//! while the body streams in.

use std::io::BufRead;
use std::path::Path;

use crate::geom::GeomMesh;
use crate::parse::ply::{
    BindingTable, PlyError, PlyHeader, PlyReader, PropertyKind, PropertySlot, PropertyValue,
};

const VERTEX_ELEMENT: &str = "vertex";
const FACE_ELEMENT: &str = "face";

/// Accepted texture coordinate spellings, in priority order.
const UV_NAMINGS: [(&str, &str); 4] = [
    ("u", "v"),
    ("s", "t"),
    ("texture_u", "texture_v"),
    ("texture_s", "texture_t"),
];

/// Face vertex list spellings, in priority order.
const FACE_LIST_NAMES: [&str; 2] = ["vertex_indices", "vertex_index"];

const FACE_TAG_NAME: &str = "face_indices";

/// Upper bound on rows reserved from a header count before any record is read.
const PREALLOCATED_ROWS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvAxis {
    U,
    V,
}

/// What to do with one decoded property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyHandler {
    Position(Axis),
    Normal(Axis),
    TexCoord(UvAxis),
    FaceVertices,
    FaceTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    Position,
    Normal,
    TexCoord,
    FaceVertices,
    FaceTag,
}

/// A set of properties that bind together or not at all.
struct BindingGroup {
    attribute: Attribute,
    element: &'static str,
    members: Vec<(&'static str, PropertyHandler)>,
    accepts: fn(&PropertyKind) -> bool,
}

fn is_scalar(kind: &PropertyKind) -> bool {
    matches!(kind, PropertyKind::Scalar(_))
}

fn is_integer_scalar(kind: &PropertyKind) -> bool {
    matches!(kind, PropertyKind::Scalar(ty) if ty.is_integer())
}

fn is_list(kind: &PropertyKind) -> bool {
    matches!(kind, PropertyKind::List { .. })
}

fn binding_groups() -> Vec<BindingGroup> {
    let mut groups = vec![
        BindingGroup {
            attribute: Attribute::Position,
            element: VERTEX_ELEMENT,
            members: vec![
                ("x", PropertyHandler::Position(Axis::X)),
                ("y", PropertyHandler::Position(Axis::Y)),
                ("z", PropertyHandler::Position(Axis::Z)),
            ],
            accepts: is_scalar,
        },
        BindingGroup {
            attribute: Attribute::Normal,
            element: VERTEX_ELEMENT,
            members: vec![
                ("nx", PropertyHandler::Normal(Axis::X)),
                ("ny", PropertyHandler::Normal(Axis::Y)),
                ("nz", PropertyHandler::Normal(Axis::Z)),
            ],
            accepts: is_scalar,
        },
    ];
    groups.extend(UV_NAMINGS.iter().map(|&(u, v)| BindingGroup {
        attribute: Attribute::TexCoord,
        element: VERTEX_ELEMENT,
        members: vec![
            (u, PropertyHandler::TexCoord(UvAxis::U)),
            (v, PropertyHandler::TexCoord(UvAxis::V)),
        ],
        accepts: is_scalar,
    }));
    groups.extend(FACE_LIST_NAMES.iter().map(|&name| BindingGroup {
        attribute: Attribute::FaceVertices,
        element: FACE_ELEMENT,
        members: vec![(name, PropertyHandler::FaceVertices)],
        accepts: is_list,
    }));
    groups.push(BindingGroup {
        attribute: Attribute::FaceTag,
        element: FACE_ELEMENT,
        members: vec![(FACE_TAG_NAME, PropertyHandler::FaceTag)],
        accepts: is_integer_scalar,
    });
    groups
}

/// Result of the binding pass over a header.
#[derive(Debug, Clone)]
pub struct MeshBindings {
    pub table: BindingTable<PropertyHandler>,
    pub vertex_count: usize,
    pub face_count: usize,
    pub has_normals: bool,
    /// The texture coordinate pair that bound, if any.
    pub uv_names: Option<(String, String)>,
    pub face_list_name: String,
    pub has_face_tags: bool,
}

impl MeshBindings {
    /// Runs the discovery and binding passes over `header`.
    ///
    /// Fails with [`PlyError::Structural`] when the vertex or face element is
    /// missing or empty, or when positions or the face vertex list cannot be
    /// bound.
    pub fn discover(header: &PlyHeader) -> Result<Self, PlyError> {
        let vertex_count = header.element_count(VERTEX_ELEMENT);
        let face_count = header.element_count(FACE_ELEMENT);
        if vertex_count == 0 || face_count == 0 {
            return Err(PlyError::Structural(format!(
                "mesh needs at least one vertex and one face (vertex={vertex_count}, face={face_count})"
            )));
        }

        let mut table = BindingTable::new(header);
        let mut bound: Vec<(Attribute, Vec<&'static str>)> = Vec::new();

        for group in binding_groups() {
            if bound.iter().any(|(attr, _)| *attr == group.attribute) {
                continue;
            }
            let slots: Option<Vec<(PropertySlot, PropertyHandler)>> = group
                .members
                .iter()
                .map(|&(name, handler)| {
                    header
                        .find_property(group.element, name)
                        .filter(|(_, decl)| (group.accepts)(&decl.kind))
                        .map(|(slot, _)| (slot, handler))
                })
                .collect();
            // A partial group registers nothing.
            let Some(slots) = slots else {
                continue;
            };
            for (slot, handler) in slots {
                table.bind(slot, handler);
            }
            bound.push((
                group.attribute,
                group.members.iter().map(|(name, _)| *name).collect(),
            ));
        }

        let names_of = |attribute: Attribute| {
            bound
                .iter()
                .find(|(attr, _)| *attr == attribute)
                .map(|(_, names)| names.clone())
        };

        if names_of(Attribute::Position).is_none() {
            return Err(PlyError::Structural(
                "vertex element lacks scalar x, y and z properties".to_string(),
            ));
        }
        let Some(face_list) = names_of(Attribute::FaceVertices) else {
            return Err(PlyError::Structural(format!(
                "face element lacks a vertex list (expected one of {})",
                FACE_LIST_NAMES.join(", ")
            )));
        };

        Ok(Self {
            table,
            vertex_count,
            face_count,
            has_normals: names_of(Attribute::Normal).is_some(),
            uv_names: names_of(Attribute::TexCoord)
                .map(|names| (names[0].to_string(), names[1].to_string())),
            face_list_name: face_list[0].to_string(),
            has_face_tags: names_of(Attribute::FaceTag).is_some(),
        })
    }
}

/// Accumulates typed arrays while the body is read.
///
/// Columns grow one row per decoded instance. Header counts only bound the
/// initial reservation, so a header that overstates its body fails with
/// [`PlyError::Data`] at the first missing record instead of allocating.
#[derive(Debug)]
pub struct MeshBuildContext {
    vertex_count: usize,
    positions: Vec<[f64; 3]>,
    normals: Option<Vec<[f64; 3]>>,
    uvs: Option<Vec<[f64; 2]>>,
    indices: Vec<u32>,
    face_tags: Option<Vec<i32>>,
    polygon: Vec<u32>,
}

impl MeshBuildContext {
    /// Creates only the columns whose handlers bound.
    #[must_use]
    pub fn new(bindings: &MeshBindings) -> Self {
        let rows = bindings.vertex_count.min(PREALLOCATED_ROWS);
        let faces = bindings.face_count.min(PREALLOCATED_ROWS);
        Self {
            vertex_count: bindings.vertex_count,
            positions: Vec::with_capacity(rows),
            normals: bindings.has_normals.then(|| Vec::with_capacity(rows)),
            uvs: bindings.uv_names.is_some().then(|| Vec::with_capacity(rows)),
            indices: Vec::with_capacity(faces * 6),
            face_tags: bindings.has_face_tags.then(|| Vec::with_capacity(faces)),
            polygon: Vec::new(),
        }
    }

    /// Stores one decoded value. Errors describe why the value was rejected.
    pub fn accept(
        &mut self,
        handler: PropertyHandler,
        instance: usize,
        value: PropertyValue<'_>,
    ) -> Result<(), String> {
        match (handler, value) {
            (PropertyHandler::Position(axis), PropertyValue::Scalar(v)) => {
                store(&mut self.positions, instance, axis.index(), v)
            }
            (PropertyHandler::Normal(axis), PropertyValue::Scalar(v)) => match &mut self.normals {
                Some(normals) => store(normals, instance, axis.index(), v),
                None => Ok(()),
            },
            (PropertyHandler::TexCoord(axis), PropertyValue::Scalar(v)) => match &mut self.uvs {
                Some(uvs) => {
                    let component = match axis {
                        UvAxis::U => 0,
                        UvAxis::V => 1,
                    };
                    store(uvs, instance, component, v)
                }
                None => Ok(()),
            },
            (PropertyHandler::FaceVertices, PropertyValue::List(items)) => self.add_polygon(items),
            (PropertyHandler::FaceTag, PropertyValue::Scalar(v)) => match &mut self.face_tags {
                Some(tags) => {
                    if v.fract() != 0.0 || v < f64::from(i32::MIN) || v > f64::from(i32::MAX) {
                        return Err(format!("face tag {v} is not a 32-bit integer"));
                    }
                    if instance != tags.len() {
                        return Err(format!("face {instance} arrived out of order"));
                    }
                    tags.push(v as i32);
                    Ok(())
                }
                None => Ok(()),
            },
            (handler, _) => Err(format!("unexpected value shape for {handler:?}")),
        }
    }

    fn add_polygon(&mut self, items: &[f64]) -> Result<(), String> {
        if items.len() < 3 {
            return Err(format!(
                "polygon has {} vertices, at least 3 are required",
                items.len()
            ));
        }
        self.polygon.clear();
        for &raw in items {
            self.polygon.push(vertex_index(raw, self.vertex_count)?);
        }
        fan_triangulate(&self.polygon, &mut self.indices);
        Ok(())
    }

    #[must_use]
    pub fn into_mesh(self) -> GeomMesh {
        GeomMesh {
            positions: self.positions,
            indices: self.indices,
            uvs: self.uvs,
            normals: self.normals,
            face_tags: self.face_tags,
        }
    }
}

/// Writes one component of row `instance`, opening the row on its first
/// component.
fn store<const N: usize>(
    column: &mut Vec<[f64; N]>,
    instance: usize,
    component: usize,
    value: f64,
) -> Result<(), String> {
    if instance == column.len() {
        column.push([0.0; N]);
    }
    let row = column
        .get_mut(instance)
        .ok_or_else(|| format!("vertex {instance} arrived out of order"))?;
    row[component] = value;
    Ok(())
}

fn vertex_index(raw: f64, vertex_count: usize) -> Result<u32, String> {
    if raw < 0.0 {
        return Err(format!("negative vertex index {raw}"));
    }
    if raw.fract() != 0.0 {
        return Err(format!("vertex index {raw} is not an integer"));
    }
    if raw >= vertex_count as f64 || raw > f64::from(u32::MAX) {
        return Err(format!(
            "vertex index {raw} out of range for {vertex_count} vertices"
        ));
    }
    Ok(raw as u32)
}

/// Appends the fan triangulation of `polygon`: `(p0, pk, pk+1)` for each
/// `k` in `1..n-1`. Polygons with fewer than three vertices add nothing.
pub fn fan_triangulate(polygon: &[u32], out: &mut Vec<u32>) {
    let Some((&first, rest)) = polygon.split_first() else {
        return;
    };
    for pair in rest.windows(2) {
        out.extend_from_slice(&[first, pair[0], pair[1]]);
    }
}

/// Reads the mesh stored in the PLY file at `path`.
pub fn load_ply_mesh(path: impl AsRef<Path>) -> Result<GeomMesh, PlyError> {
    let path = path.as_ref();
    let mesh = read_mesh(PlyReader::open(path)?)?;
    log::debug!(
        "loaded PLY mesh \"{}\": {} vertices, {} triangles",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// Reads a PLY mesh from an already opened source.
pub fn read_ply_mesh<R: BufRead>(reader: R) -> Result<GeomMesh, PlyError> {
    read_mesh(PlyReader::new(reader)?)
}

fn read_mesh<R: BufRead>(reader: PlyReader<R>) -> Result<GeomMesh, PlyError> {
    let bindings = MeshBindings::discover(reader.header())?;
    log::debug!(
        "PLY bindings: {} properties, normals={} uvs={:?} faces={} tags={}",
        bindings.table.bound_count(),
        bindings.has_normals,
        bindings.uv_names,
        bindings.face_list_name,
        bindings.has_face_tags
    );

    let mut ctx = MeshBuildContext::new(&bindings);
    reader.read_records(&bindings.table, |handler, pos, value| {
        ctx.accept(*handler, pos.instance, value)
    })?;
    Ok(ctx.into_mesh())
}
