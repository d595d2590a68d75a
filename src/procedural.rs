//! Procedurally generated modal discretizations.
//!
//! Segment meshes and rectangular quad meshes with a hierarchical modal basis built from
//! integrated Legendre polynomials. Both implement the element assembler traits, so that global
//! systems can be built and solved without an external discretization library.
//!
//! The one-dimensional basis of order `p` on the reference interval `[-1, 1]` has `p + 1` modes:
//!
//! ```text
//! φ_0(ξ) = (1 - ξ) / 2,    φ_1(ξ) = (1 + ξ) / 2,
//! φ_k(ξ) = (P_k(ξ) - P_{k-2}(ξ)) / (2k - 1),    k = 2..=p,
//! ```
//!
//! where `P_k` is the Legendre polynomial of degree `k`. The first two modes are vertex modes, the
//! remaining ones vanish at both ends and satisfy `φ_k(-ξ) = (-1)^k φ_k(ξ)`.
use crate::assembly::local::{
    ElementConnectivityAssembler, ElementLayout, ElementMatrixAssembler, Entity, EntityDofs, Orientation,
};
use crate::boundary::BoundaryConditions;
use crate::key::{ConstFactor, MatrixKey, MatrixType};
use eyre::{ensure, eyre};
use nalgebra::{DMatrix, DMatrixViewMut, DVector};
use std::f64::consts::PI;

/// Gauss-Legendre points and weights on `[-1, 1]`, exact for polynomials of degree `2n - 1`.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre_with_derivative(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_with_derivative(n, x);
        points.push(x);
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
    }
    (points, weights)
}

/// `P_n(x)` and `P_n'(x)` for `x` in the open interval `(-1, 1)`.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p_prev = 1.0;
    let mut p = x;
    for k in 1..n {
        let k = k as f64;
        let p_next = ((2.0 * k + 1.0) * x * p - k * p_prev) / (k + 1.0);
        p_prev = p;
        p = p_next;
    }
    let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// Values and derivatives of the `order + 1` modes at `xi`.
pub fn modal_basis(order: usize, xi: f64) -> (Vec<f64>, Vec<f64>) {
    let num_modes = order + 1;
    let mut legendre = vec![1.0, xi];
    for k in 1..order {
        let k_f = k as f64;
        let next = ((2.0 * k_f + 1.0) * xi * legendre[k] - k_f * legendre[k - 1]) / (k_f + 1.0);
        legendre.push(next);
    }

    let mut values = Vec::with_capacity(num_modes);
    let mut derivatives = Vec::with_capacity(num_modes);
    values.extend([(1.0 - xi) / 2.0, (1.0 + xi) / 2.0]);
    derivatives.extend([-0.5, 0.5]);
    for k in 2..num_modes {
        values.push((legendre[k] - legendre[k - 2]) / (2 * k - 1) as f64);
        derivatives.push(legendre[k - 1]);
    }
    (values, derivatives)
}

/// One-dimensional matrices on the reference interval.
#[derive(Debug, Clone)]
struct ReferenceMatrices {
    /// `∫ φ_i φ_j`
    mass: DMatrix<f64>,
    /// `∫ φ_i' φ_j'`
    stiffness: DMatrix<f64>,
    /// `∫ φ_i φ_j'`
    advection: DMatrix<f64>,
}

impl ReferenceMatrices {
    fn new(order: usize) -> Self {
        let n = order + 1;
        let mut mass = DMatrix::zeros(n, n);
        let mut stiffness = DMatrix::zeros(n, n);
        let mut advection = DMatrix::zeros(n, n);
        let (points, weights) = gauss_legendre(order + 2);
        for (&xi, &w) in points.iter().zip(&weights) {
            let (phi, dphi) = modal_basis(order, xi);
            for i in 0..n {
                for j in 0..n {
                    mass[(i, j)] += w * phi[i] * phi[j];
                    stiffness[(i, j)] += w * dphi[i] * dphi[j];
                    advection[(i, j)] += w * phi[i] * dphi[j];
                }
            }
        }
        Self {
            mass,
            stiffness,
            advection,
        }
    }
}

fn lambda(key: &MatrixKey) -> eyre::Result<f64> {
    key.constant(ConstFactor::Lambda)
        .ok_or_else(|| eyre!("{key} requires the constant Lambda"))
}

fn velocity(key: &MatrixKey) -> eyre::Result<f64> {
    key.constant(ConstFactor::Velocity)
        .ok_or_else(|| eyre!("{key} requires the constant Velocity"))
}

fn copy_into_output(matrix: &DMatrix<f64>, mut output: DMatrixViewMut<f64>) -> eyre::Result<()> {
    ensure!(
        output.shape() == matrix.shape(),
        "output is {:?}, but the element matrix is {:?}",
        output.shape(),
        matrix.shape()
    );
    output.copy_from(matrix);
    Ok(())
}

/// Segments `[x_e, x_{e+1}]` of a strictly increasing sequence of vertices.
///
/// Element `e` has the coefficients `[φ_0, φ_1, ..., φ_p]`, with `φ_0` on vertex `e` and `φ_1` on
/// vertex `e + 1`. The remaining modes are interior.
#[derive(Debug, Clone)]
pub struct SegmentMesh {
    vertices: Vec<f64>,
    order: usize,
    reference: ReferenceMatrices,
}

impl SegmentMesh {
    pub fn new(vertices: Vec<f64>, order: usize) -> eyre::Result<Self> {
        ensure!(order >= 1, "order must be at least 1");
        ensure!(vertices.len() >= 2, "a segment mesh needs at least two vertices");
        ensure!(
            vertices.windows(2).all(|pair| pair[0] < pair[1]),
            "vertices must be strictly increasing"
        );
        Ok(Self {
            vertices,
            order,
            reference: ReferenceMatrices::new(order),
        })
    }

    pub fn uniform(x_min: f64, x_max: f64, num_elements: usize, order: usize) -> eyre::Result<Self> {
        ensure!(num_elements > 0, "a segment mesh needs at least one element");
        let h = (x_max - x_min) / num_elements as f64;
        let vertices = (0..=num_elements).map(|i| x_min + i as f64 * h).collect();
        Self::new(vertices, order)
    }

    pub fn vertices(&self) -> &[f64] {
        &self.vertices
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_modes(&self) -> usize {
        self.order + 1
    }

    pub fn vertex_entity(&self, vertex: usize) -> Entity {
        Entity::vertex(vertex)
    }

    pub fn first_vertex(&self) -> Entity {
        Entity::vertex(0)
    }

    pub fn last_vertex(&self) -> Entity {
        Entity::vertex(self.vertices.len() - 1)
    }

    fn jacobian(&self, element: usize) -> f64 {
        (self.vertices[element + 1] - self.vertices[element]) / 2.0
    }

    pub fn element_matrix(&self, element: usize, key: &MatrixKey) -> eyre::Result<DMatrix<f64>> {
        ensure!(element < self.num_elements(), "element {element} is out of bounds");
        let j = self.jacobian(element);
        let reference = &self.reference;
        let laplacian = || &reference.stiffness / j;
        let matrix = match key.matrix_type() {
            MatrixType::Mass => &reference.mass * j,
            MatrixType::Laplacian => laplacian(),
            MatrixType::Helmholtz => laplacian() + &reference.mass * (lambda(key)? * j),
            MatrixType::LinearAdvectionDiffusionReaction => {
                laplacian() + &reference.advection * velocity(key)? + &reference.mass * (lambda(key)? * j)
            }
        };
        Ok(matrix)
    }

    /// Element inner products `∫ f φ_i` of every element, concatenated.
    pub fn inner_products(&self, f: impl Fn(f64) -> f64) -> DVector<f64> {
        let n = self.num_modes();
        let mut result = DVector::zeros(self.num_elements() * n);
        let (points, weights) = gauss_legendre(self.order + 4);
        for element in 0..self.num_elements() {
            let (a, j) = (self.vertices[element], self.jacobian(element));
            for (&xi, &w) in points.iter().zip(&weights) {
                let (phi, _) = modal_basis(self.order, xi);
                let fx = f(a + (xi + 1.0) * j);
                for (i, phi_i) in phi.iter().enumerate() {
                    result[element * n + i] += w * j * fx * phi_i;
                }
            }
        }
        result
    }

    /// Right-hand side of a point load of the given magnitude at a vertex.
    pub fn point_load(&self, vertex: usize, magnitude: f64) -> DVector<f64> {
        assert!(vertex < self.vertices.len(), "vertex index out of bounds");
        let n = self.num_modes();
        let mut result = DVector::zeros(self.num_elements() * n);
        if vertex < self.num_elements() {
            result[vertex * n] = magnitude;
        } else {
            result[(vertex - 1) * n + 1] = magnitude;
        }
        result
    }

    /// Evaluates a concatenated local coefficient vector at `x`.
    pub fn evaluate(&self, local_coeffs: &[f64], x: f64) -> Option<f64> {
        let element = self
            .vertices
            .windows(2)
            .position(|pair| pair[0] <= x && x <= pair[1])?;
        let n = self.num_modes();
        let xi = (x - self.vertices[element]) / self.jacobian(element) - 1.0;
        let (phi, _) = modal_basis(self.order, xi);
        let coeffs = &local_coeffs[element * n..(element + 1) * n];
        Some(coeffs.iter().zip(&phi).map(|(c, phi)| c * phi).sum())
    }
}

impl ElementConnectivityAssembler for SegmentMesh {
    fn num_elements(&self) -> usize {
        self.vertices.len() - 1
    }

    fn element_layout(&self, element_index: usize) -> ElementLayout {
        let vertex_dofs = |vertex, position| EntityDofs {
            entity: Entity::vertex(vertex),
            orientation: Orientation::Unoriented,
            boundary_dofs: vec![position],
        };
        ElementLayout {
            num_coeffs: self.num_modes(),
            boundary_map: vec![0, 1],
            interior_map: (2..self.num_modes()).collect(),
            entities: vec![vertex_dofs(element_index, 0), vertex_dofs(element_index + 1, 1)],
        }
    }
}

impl ElementMatrixAssembler<f64> for SegmentMesh {
    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        key: &MatrixKey,
        output: DMatrixViewMut<f64>,
    ) -> eyre::Result<()> {
        copy_into_output(&self.element_matrix(element_index, key)?, output)
    }
}

/// Uniform grid of axis-aligned rectangles covering `[0, l_x] × [0, l_y]`.
///
/// Edges only appear in element layouts for orders of at least 2.
///
/// Element `(i, j)` has index `i + n_x j`, and its coefficients are the tensor products
/// `φ_a(ξ) φ_b(η)` stored at `a + (p + 1) b`. By default `ξ` increases with `x`. A mirrored
/// element runs `ξ` against `x`, so it traverses its horizontal edges in reverse and its vertex
/// modes along `x` are swapped. Mirroring leaves the discrete function space unchanged, so it is
/// useful to check that orientation signs are applied consistently.
///
/// Entity ids: vertex `(v_x, v_y)` is `v_x + (n_x + 1) v_y`. Horizontal edge `(i, v_y)` is
/// `i + n_x v_y`, vertical edge `(v_x, j)` is `n_x (n_y + 1) + v_x + (n_x + 1) j`. Edges are
/// oriented along the positive axis directions.
#[derive(Debug, Clone)]
pub struct QuadMesh {
    lengths: [f64; 2],
    num_cells: [usize; 2],
    order: usize,
    mirrored: Vec<bool>,
    reference: ReferenceMatrices,
}

impl QuadMesh {
    pub fn new(lengths: [f64; 2], num_cells: [usize; 2], order: usize) -> eyre::Result<Self> {
        ensure!(order >= 1, "order must be at least 1");
        ensure!(num_cells[0] > 0 && num_cells[1] > 0, "the grid must have at least one cell");
        ensure!(lengths[0] > 0.0 && lengths[1] > 0.0, "lengths must be positive");
        Ok(Self {
            lengths,
            num_cells,
            order,
            mirrored: vec![false; num_cells[0] * num_cells[1]],
            reference: ReferenceMatrices::new(order),
        })
    }

    /// Mirrors the given elements along `x`.
    pub fn with_mirrored_elements(mut self, elements: impl IntoIterator<Item = usize>) -> Self {
        for element in elements {
            assert!(element < self.mirrored.len(), "element index out of bounds");
            self.mirrored[element] = true;
        }
        self
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_modes(&self) -> usize {
        let n = self.order + 1;
        n * n
    }

    pub fn is_mirrored(&self, element: usize) -> bool {
        self.mirrored[element]
    }

    fn cell_size(&self) -> [f64; 2] {
        [
            self.lengths[0] / self.num_cells[0] as f64,
            self.lengths[1] / self.num_cells[1] as f64,
        ]
    }

    fn cell(&self, element: usize) -> (usize, usize) {
        (element % self.num_cells[0], element / self.num_cells[0])
    }

    pub fn vertex(&self, vx: usize, vy: usize) -> Entity {
        Entity::vertex(vx + (self.num_cells[0] + 1) * vy)
    }

    pub fn horizontal_edge(&self, i: usize, vy: usize) -> Entity {
        Entity::edge(i + self.num_cells[0] * vy)
    }

    pub fn vertical_edge(&self, vx: usize, j: usize) -> Entity {
        let [nx, ny] = self.num_cells;
        Entity::edge(nx * (ny + 1) + vx + (nx + 1) * j)
    }

    /// Vertices and edges on the boundary of the domain, with their physical positions.
    fn boundary_vertices(&self) -> Vec<(Entity, [f64; 2])> {
        let [nx, ny] = self.num_cells;
        let [hx, hy] = self.cell_size();
        let mut vertices = Vec::new();
        for vy in 0..=ny {
            for vx in 0..=nx {
                if vx == 0 || vx == nx || vy == 0 || vy == ny {
                    vertices.push((self.vertex(vx, vy), [vx as f64 * hx, vy as f64 * hy]));
                }
            }
        }
        vertices
    }

    pub fn boundary_edges(&self) -> Vec<Entity> {
        let [nx, ny] = self.num_cells;
        let horizontal = (0..nx).flat_map(|i| [self.horizontal_edge(i, 0), self.horizontal_edge(i, ny)]);
        let vertical = (0..ny).flat_map(|j| [self.vertical_edge(0, j), self.vertical_edge(nx, j)]);
        horizontal.chain(vertical).collect()
    }

    /// Dirichlet conditions on the whole boundary, interpolating `f` at the boundary vertices.
    ///
    /// Edge modes are set to zero, so the boundary data is linear along each edge.
    pub fn dirichlet_from_vertex_values(&self, f: impl Fn(f64, f64) -> f64) -> BoundaryConditions {
        let edge_values = vec![0.0; self.order - 1];
        let mut bcs = BoundaryConditions::new();
        for (vertex, [x, y]) in self.boundary_vertices() {
            bcs.insert_dirichlet(vertex, vec![f(x, y)]);
        }
        if self.order > 1 {
            for edge in self.boundary_edges() {
                bcs.insert_dirichlet(edge, edge_values.clone());
            }
        }
        bcs
    }

    /// Physical `x` of the local vertex mode `a` (0 or 1) of an element.
    fn physical_x_index(&self, element: usize, a: usize) -> usize {
        if self.mirrored[element] {
            1 - a
        } else {
            a
        }
    }

    /// Maps reference coordinates of an element to physical coordinates.
    fn to_physical(&self, element: usize, xi: f64, eta: f64) -> [f64; 2] {
        let (i, j) = self.cell(element);
        let [hx, hy] = self.cell_size();
        let direction = if self.mirrored[element] { -1.0 } else { 1.0 };
        let xc = (i as f64 + 0.5) * hx;
        let yc = (j as f64 + 0.5) * hy;
        [xc + direction * xi * hx / 2.0, yc + eta * hy / 2.0]
    }

    pub fn element_matrix(&self, element: usize, key: &MatrixKey) -> eyre::Result<DMatrix<f64>> {
        ensure!(element < self.mirrored.len(), "element {element} is out of bounds");
        let [hx, hy] = self.cell_size();
        let reference = &self.reference;
        let (mass_x, mass_y) = (&reference.mass * (hx / 2.0), &reference.mass * (hy / 2.0));
        let (stiffness_x, stiffness_y) = (&reference.stiffness * (2.0 / hx), &reference.stiffness * (2.0 / hy));

        let mut matrix = DMatrix::zeros(self.num_modes(), self.num_modes());
        let add_laplacian = |matrix: &mut DMatrix<f64>| {
            add_tensor_product(matrix, &stiffness_x, &mass_y, 1.0);
            add_tensor_product(matrix, &mass_x, &stiffness_y, 1.0);
        };
        match key.matrix_type() {
            MatrixType::Mass => add_tensor_product(&mut matrix, &mass_x, &mass_y, 1.0),
            MatrixType::Laplacian => add_laplacian(&mut matrix),
            MatrixType::Helmholtz => {
                let lambda = lambda(key)?;
                add_laplacian(&mut matrix);
                add_tensor_product(&mut matrix, &mass_x, &mass_y, lambda);
            }
            MatrixType::LinearAdvectionDiffusionReaction => {
                // Velocity along x
                let (lambda, velocity) = (lambda(key)?, velocity(key)?);
                let direction = if self.mirrored[element] { -1.0 } else { 1.0 };
                add_laplacian(&mut matrix);
                add_tensor_product(&mut matrix, &reference.advection, &mass_y, direction * velocity);
                add_tensor_product(&mut matrix, &mass_x, &mass_y, lambda);
            }
        }
        Ok(matrix)
    }

    /// Element inner products `∫ f φ_i` of every element, concatenated.
    pub fn inner_products(&self, f: impl Fn(f64, f64) -> f64) -> DVector<f64> {
        let n = self.order + 1;
        let [hx, hy] = self.cell_size();
        let jacobian = hx * hy / 4.0;
        let (points, weights) = gauss_legendre(self.order + 4);
        let basis: Vec<_> = points.iter().map(|&xi| modal_basis(self.order, xi).0).collect();

        let num_modes = self.num_modes();
        let mut result = DVector::zeros(self.mirrored.len() * num_modes);
        for element in 0..self.mirrored.len() {
            for (qx, &wx) in weights.iter().enumerate() {
                for (qy, &wy) in weights.iter().enumerate() {
                    let [x, y] = self.to_physical(element, points[qx], points[qy]);
                    let weight = wx * wy * jacobian * f(x, y);
                    for b in 0..n {
                        for a in 0..n {
                            result[element * num_modes + a + n * b] += weight * basis[qx][a] * basis[qy][b];
                        }
                    }
                }
            }
        }
        result
    }

    /// Evaluates a concatenated local coefficient vector at `(x, y)`.
    pub fn evaluate(&self, local_coeffs: &[f64], x: f64, y: f64) -> Option<f64> {
        let [hx, hy] = self.cell_size();
        let [nx, ny] = self.num_cells;
        if !(0.0..=self.lengths[0]).contains(&x) || !(0.0..=self.lengths[1]).contains(&y) {
            return None;
        }
        let i = ((x / hx) as usize).min(nx - 1);
        let j = ((y / hy) as usize).min(ny - 1);
        let element = i + nx * j;
        let direction = if self.mirrored[element] { -1.0 } else { 1.0 };
        let xi = direction * (2.0 * (x - (i as f64 + 0.5) * hx) / hx);
        let eta = 2.0 * (y - (j as f64 + 0.5) * hy) / hy;

        let n = self.order + 1;
        let (phi_x, _) = modal_basis(self.order, xi);
        let (phi_y, _) = modal_basis(self.order, eta);
        let coeffs = &local_coeffs[element * n * n..(element + 1) * n * n];
        let mut value = 0.0;
        for b in 0..n {
            for a in 0..n {
                value += coeffs[a + n * b] * phi_x[a] * phi_y[b];
            }
        }
        Some(value)
    }
}

/// `matrix[(a1 + n b1, a2 + n b2)] += scale * x[(a1, a2)] * y[(b1, b2)]`
fn add_tensor_product(matrix: &mut DMatrix<f64>, x: &DMatrix<f64>, y: &DMatrix<f64>, scale: f64) {
    let n = x.nrows();
    for b1 in 0..n {
        for b2 in 0..n {
            let y_entry = scale * y[(b1, b2)];
            for a1 in 0..n {
                for a2 in 0..n {
                    matrix[(a1 + n * b1, a2 + n * b2)] += x[(a1, a2)] * y_entry;
                }
            }
        }
    }
}

impl ElementConnectivityAssembler for QuadMesh {
    fn num_elements(&self) -> usize {
        self.mirrored.len()
    }

    fn element_layout(&self, element_index: usize) -> ElementLayout {
        let n = self.order + 1;
        let (i, j) = self.cell(element_index);
        let coeff = |a: usize, b: usize| a + n * b;

        let mut boundary_map = Vec::new();
        let mut entities = Vec::new();
        let mut push_entity = |entity, orientation, coeffs: Vec<usize>| {
            let start = boundary_map.len();
            boundary_map.extend_from_slice(&coeffs);
            entities.push(EntityDofs {
                entity,
                orientation,
                boundary_dofs: (start..boundary_map.len()).collect(),
            });
        };

        for b in 0..2 {
            for a in 0..2 {
                let vertex = self.vertex(i + self.physical_x_index(element_index, a), j + b);
                push_entity(vertex, Orientation::Unoriented, vec![coeff(a, b)]);
            }
        }
        let reversed = self.mirrored[element_index];
        for b in (0..2).filter(|_| n > 2) {
            let edge = self.horizontal_edge(i, j + b);
            push_entity(edge, Orientation::Edge { reversed }, (2..n).map(|a| coeff(a, b)).collect());
        }
        for a in (0..2).filter(|_| n > 2) {
            let edge = self.vertical_edge(i + self.physical_x_index(element_index, a), j);
            push_entity(
                edge,
                Orientation::Edge { reversed: false },
                (2..n).map(|b| coeff(a, b)).collect(),
            );
        }

        let interior_map = (2..n)
            .flat_map(|b| (2..n).map(move |a| coeff(a, b)))
            .collect();
        ElementLayout {
            num_coeffs: n * n,
            boundary_map,
            interior_map,
            entities,
        }
    }
}

impl ElementMatrixAssembler<f64> for QuadMesh {
    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        key: &MatrixKey,
        output: DMatrixViewMut<f64>,
    ) -> eyre::Result<()> {
        copy_into_output(&self.element_matrix(element_index, key)?, output)
    }
}
