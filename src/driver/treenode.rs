// Predicate tree handed to drivers by the plan layer. Drivers walk it to
// decide whether they can serve a query without a full scan.

use std::fmt;

/// Node kind. Comparisons carry their operands as children; `Fetch` carries
/// the fetched column list as its first option node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Field,
    ConstantValue,
    Variable,
    Equals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
    EqualsToNull,
    Like,
    And,
    List,
    Fetch,
}

/// One node of a predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    node_type: NodeType,
    value: String,
    operands: Vec<TreeNode>,
    options: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            value: String::new(),
            operands: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Column reference by field index (0 is the object-id field).
    pub fn field(index: i32) -> Self {
        Self {
            node_type: NodeType::Field,
            value: index.to_string(),
            operands: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn constant(value: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::ConstantValue,
            value: value.into(),
            operands: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn variable(value: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::Variable,
            value: value.into(),
            operands: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Binary comparison node.
    pub fn comparison(node_type: NodeType, left: TreeNode, right: TreeNode) -> Self {
        Self {
            node_type,
            value: String::new(),
            operands: vec![left, right],
            options: Vec::new(),
        }
    }

    /// `field IS NULL`.
    pub fn equals_to_null(field: TreeNode) -> Self {
        Self {
            node_type: NodeType::EqualsToNull,
            value: String::new(),
            operands: vec![field],
            options: Vec::new(),
        }
    }

    /// `field LIKE pattern [ESCAPE esc]`.
    pub fn like(field: TreeNode, pattern: TreeNode, escape: Option<TreeNode>) -> Self {
        Self {
            node_type: NodeType::Like,
            value: String::new(),
            operands: vec![field, pattern],
            options: escape.into_iter().collect(),
        }
    }

    pub fn and(operands: Vec<TreeNode>) -> Self {
        Self {
            node_type: NodeType::And,
            value: String::new(),
            operands,
            options: Vec::new(),
        }
    }

    pub fn list(operands: Vec<TreeNode>) -> Self {
        Self {
            node_type: NodeType::List,
            value: String::new(),
            operands,
            options: Vec::new(),
        }
    }

    /// Per-tuple lookup by the given columns. The column list travels as
    /// option 0, the key-value slot as option 1.
    pub fn fetch(columns: Vec<TreeNode>) -> Self {
        Self {
            node_type: NodeType::Fetch,
            value: String::new(),
            operands: Vec::new(),
            options: vec![TreeNode::list(columns), TreeNode::new(NodeType::List)],
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Integer interpretation of the node value; -1 when it does not parse.
    pub fn value_as_int(&self) -> i32 {
        self.value.parse().unwrap_or(-1)
    }

    pub fn operand_size(&self) -> usize {
        self.operands.len()
    }

    pub fn operand_at(&self, i: usize) -> Option<&TreeNode> {
        self.operands.get(i)
    }

    pub fn operands(&self) -> &[TreeNode] {
        &self.operands
    }

    pub fn option_size(&self) -> usize {
        self.options.len()
    }

    pub fn option_at(&self, i: usize) -> Option<&TreeNode> {
        self.options.get(i)
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node_type {
            NodeType::Field => write!(f, "#{}", self.value),
            NodeType::ConstantValue | NodeType::Variable => write!(f, "{}", self.value),
            _ => {
                write!(f, "{:?}(", self.node_type)?;
                for (i, op) in self.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", op)?;
                }
                write!(f, ")")
            }
        }
    }
}
